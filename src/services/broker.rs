use async_trait::async_trait;
use redis::{AsyncCommands, Direction};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Queue feeding the OCR worker pool.
pub const OCR_QUEUE: &str = "ocr-queue";
/// Queue feeding the translation+render worker pool.
pub const TRANSLATION_QUEUE: &str = "translation-queue";

const REQUEUE_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
  redis.call('RPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// A message handed to one consumer and held until acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub queue: String,
    pub consumer: String,
    pub payload: String,
}

/// Durable named queues with explicit acknowledgement.
///
/// Delivery is at-least-once: a consumed message stays in the consumer's
/// in-flight list until `ack`. `requeue` hands it back immediately and
/// `recover` returns everything a consumer left in flight (a crash before
/// ack) to the queue.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, queue: &str, payload: &str) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` when the queue stayed empty.
    async fn consume(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Move every in-flight message of `consumer` back onto `queue`; returns the count.
    async fn recover(&self, queue: &str, consumer: &str) -> Result<u64, BrokerError>;

    async fn depth(&self, queue: &str) -> Result<u64, BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;
}

fn processing_key(queue: &str, consumer: &str) -> String {
    format!("{queue}:processing:{consumer}")
}

/// Redis reliable-queue broker: a list per queue and an in-flight list per consumer.
pub struct RedisBroker {
    client: redis::Client,
    requeue: redis::Script,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url).map_err(BrokerError::Redis)?;
        Ok(Self {
            client,
            requeue: redis::Script::new(REQUEUE_SCRIPT),
        })
    }

    /// Open the broker and verify it answers within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let broker = Self::new(redis_url)?;
        tokio::time::timeout(timeout, broker.health_check())
            .await
            .map_err(|_| BrokerError::ConnectTimeout(timeout))??;
        Ok(broker)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(BrokerError::Redis)
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(queue, payload).await?;
        tracing::debug!(queue, "Message published");
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .blmove(
                queue,
                processing_key(queue, consumer),
                Direction::Right,
                Direction::Left,
                timeout.as_secs_f64(),
            )
            .await?;
        Ok(payload.map(|payload| Delivery {
            queue: queue.to_string(),
            consumer: consumer.to_string(),
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(
            processing_key(&delivery.queue, &delivery.consumer),
            1,
            &delivery.payload,
        )
        .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .requeue
            .key(processing_key(&delivery.queue, &delivery.consumer))
            .key(&delivery.queue)
            .arg(&delivery.payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<u64, BrokerError> {
        let mut conn = self.connection().await?;
        let processing = processing_key(queue, consumer);
        let mut moved = 0;
        loop {
            let item: Option<String> = conn
                .lmove(&processing, queue, Direction::Right, Direction::Right)
                .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn depth(&self, queue: &str) -> Result<u64, BrokerError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(queue).await?)
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(BrokerError::Redis)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryQueues {
    ready: HashMap<String, VecDeque<String>>,
    in_flight: HashMap<String, Vec<String>>,
    published: HashMap<String, usize>,
}

/// In-process broker with the Redis broker's delivery semantics.
pub struct InMemoryBroker {
    queues: Mutex<MemoryQueues>,
    arrivals: Notify,
    available: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            queues: Mutex::new(MemoryQueues::default()),
            arrivals: Notify::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total messages ever published to `queue`.
    pub fn published(&self, queue: &str) -> usize {
        self.lock()
            .map(|q| q.published.get(queue).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Messages currently held unacknowledged by `consumer`.
    pub fn in_flight(&self, queue: &str, consumer: &str) -> usize {
        self.lock()
            .map(|q| {
                q.in_flight
                    .get(&processing_key(queue, consumer))
                    .map_or(0, Vec::len)
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryQueues>, BrokerError> {
        self.queues.lock().map_err(|_| BrokerError::Poisoned)
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable)
        }
    }

    fn try_take(&self, queue: &str, consumer: &str) -> Result<Option<String>, BrokerError> {
        let mut queues = self.lock()?;
        let Some(payload) = queues.ready.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        queues
            .in_flight
            .entry(processing_key(queue, consumer))
            .or_default()
            .push(payload.clone());
        Ok(Some(payload))
    }

    fn remove_in_flight(queues: &mut MemoryQueues, delivery: &Delivery) -> bool {
        let key = processing_key(&delivery.queue, &delivery.consumer);
        let Some(list) = queues.in_flight.get_mut(&key) else {
            return false;
        };
        match list.iter().position(|p| p == &delivery.payload) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        self.ensure_available()?;
        {
            let mut queues = self.lock()?;
            queues
                .ready
                .entry(queue.to_string())
                .or_default()
                .push_back(payload.to_string());
            *queues.published.entry(queue.to_string()).or_default() += 1;
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.ensure_available()?;
            let arrival = self.arrivals.notified();
            if let Some(payload) = self.try_take(queue, consumer)? {
                return Ok(Some(Delivery {
                    queue: queue.to_string(),
                    consumer: consumer.to_string(),
                    payload,
                }));
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let mut queues = self.lock()?;
        Self::remove_in_flight(&mut queues, delivery);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_available()?;
        {
            let mut queues = self.lock()?;
            if Self::remove_in_flight(&mut queues, delivery) {
                queues
                    .ready
                    .entry(delivery.queue.clone())
                    .or_default()
                    .push_front(delivery.payload.clone());
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<u64, BrokerError> {
        self.ensure_available()?;
        let moved = {
            let mut queues = self.lock()?;
            let orphans = queues
                .in_flight
                .remove(&processing_key(queue, consumer))
                .unwrap_or_default();
            let moved = orphans.len() as u64;
            let ready = queues.ready.entry(queue.to_string()).or_default();
            for payload in orphans.into_iter().rev() {
                ready.push_front(payload);
            }
            moved
        };
        self.arrivals.notify_waiters();
        Ok(moved)
    }

    async fn depth(&self, queue: &str) -> Result<u64, BrokerError> {
        self.ensure_available()?;
        Ok(self.lock()?.ready.get(queue).map_or(0, |q| q.len() as u64))
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        self.ensure_available()
    }
}

/// Ceiling on unacknowledged messages a consumer process may hold at once.
///
/// The backpressure monitor moves the ceiling; workers take a slot before
/// consuming and release it after the ack. Lowering the ceiling never revokes
/// slots already held, it only delays new ones.
pub struct PrefetchLimit {
    limit: AtomicUsize,
    in_flight: Mutex<usize>,
    released: Notify,
}

impl PrefetchLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.max(1)),
            in_flight: Mutex::new(0),
            released: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::SeqCst);
        self.released.notify_waiters();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|n| *n).unwrap_or(0)
    }

    /// Wait for a free slot under the current ceiling.
    pub async fn acquire(&self) -> PrefetchSlot<'_> {
        loop {
            let released = self.released.notified();
            if let Some(slot) = self.try_acquire() {
                return slot;
            }
            released.await;
        }
    }

    pub fn try_acquire(&self) -> Option<PrefetchSlot<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if *in_flight < self.limit() {
            *in_flight += 1;
            Some(PrefetchSlot { owner: self })
        } else {
            None
        }
    }

    fn release(&self) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            *in_flight = in_flight.saturating_sub(1);
        }
        self.released.notify_waiters();
    }
}

/// A held prefetch slot, returned on drop.
pub struct PrefetchSlot<'a> {
    owner: &'a PrefetchLimit,
}

impl Drop for PrefetchSlot<'_> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Broker did not answer within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Broker unavailable")]
    Unavailable,

    #[error("Broker state lock poisoned")]
    Poisoned,
}
