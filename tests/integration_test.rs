use scan_translate::{
    models::job::{Job, JobStatus},
    services::{
        broker::{MessageBroker, RedisBroker},
        status_store::{RedisStatusStore, StatusStore},
    },
};
use std::time::Duration;
use uuid::Uuid;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// Integration test: broker and status store against a live Redis
///
/// This test verifies:
/// 1. Publish / consume / ack on a reliable queue
/// 2. Recovery of a message left in flight by a dead consumer
/// 3. Forward-only status transitions and once-only completion counting
///
/// Note: This requires a running Redis instance at REDIS_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_pipeline_plumbing() {
    let broker = RedisBroker::connect(&redis_url(), Duration::from_secs(5))
        .await
        .expect("Failed to connect to Redis");
    let store = RedisStatusStore::new(&redis_url()).expect("Failed to open status store");

    // Unique queue and job per run so reruns never see stale state.
    let queue = format!("test-queue-{}", Uuid::new_v4());
    let job_id = format!("test-job-{}", Uuid::new_v4());
    let payload = serde_json::to_string(&Job::new(job_id.clone(), "uploads/page.png")).unwrap();

    // 1. Publish and consume
    broker.publish(&queue, &payload).await.expect("Publish failed");
    assert_eq!(broker.depth(&queue).await.unwrap(), 1);

    let delivery = broker
        .consume(&queue, "dead-worker", Duration::from_secs(1))
        .await
        .expect("Consume failed")
        .expect("Message missing");
    assert_eq!(delivery.payload, payload);
    assert_eq!(broker.depth(&queue).await.unwrap(), 0);

    // 2. The consumer dies; its in-flight message is recovered
    assert_eq!(broker.recover(&queue, "dead-worker").await.unwrap(), 1);
    let delivery = broker
        .consume(&queue, "live-worker", Duration::from_secs(1))
        .await
        .unwrap()
        .expect("Recovered message missing");
    broker.ack(&delivery).await.expect("Ack failed");
    assert_eq!(broker.recover(&queue, "live-worker").await.unwrap(), 0);

    // 3. Status transitions
    let before = store.aggregate().await.unwrap();
    assert!(store.set_status(&job_id, JobStatus::Submitted).await.unwrap());
    assert!(store.set_status(&job_id, JobStatus::OcrInProgress).await.unwrap());
    assert!(!store.set_status(&job_id, JobStatus::Submitted).await.unwrap());
    assert!(store.complete(&job_id, Duration::from_millis(1500)).await.unwrap());
    assert!(!store.complete(&job_id, Duration::from_millis(1500)).await.unwrap());

    let record = store.get(&job_id).await.unwrap().expect("Record missing");
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.response_time_ms, 1500);

    let after = store.aggregate().await.unwrap();
    assert_eq!(after.total_requests, before.total_requests + 1);
}
