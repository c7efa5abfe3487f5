use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::responses::ErrorResponse;

struct ClientLimiter {
    limiter: DefaultDirectRateLimiter,
    last_seen: Instant,
}

/// Per-client token buckets, created on first request and evicted after
/// `idle` without traffic. Lookup, creation and eviction share one lock.
pub struct RateLimiterRegistry {
    quota: Quota,
    idle: Duration,
    clients: Mutex<HashMap<String, ClientLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(per_second: u32, burst: u32, idle: Duration) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            quota: Quota::per_second(per_second).allow_burst(burst),
            idle,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `client`; `false` means the request must be rejected.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.retain(|_, c| now.saturating_duration_since(c.last_seen) <= self.idle);

        let entry = clients
            .entry(client.to_string())
            .or_insert_with(|| ClientLimiter {
                limiter: RateLimiter::direct(self.quota),
                last_seen: now,
            });
        entry.last_seen = now;
        entry.limiter.check().is_ok()
    }

    /// Number of clients currently tracked.
    pub fn tracked(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Key requests by peer address, falling back to the first `X-Forwarded-For` hop.
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rejects over-quota clients with 429 before the handler runs.
pub async fn rate_limit(
    State(registry): State<Arc<RateLimiterRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    if !registry.check(&client) {
        metrics::counter!("rate_limited_requests_total").increment(1);
        tracing::warn!(client = %client, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Rate limit exceeded. Please try again later.".to_string(),
            }),
        )
            .into_response();
    }
    next.run(request).await
}
