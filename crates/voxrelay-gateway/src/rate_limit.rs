//! Per-IP request rate limiter for the relay endpoints.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::GatewayState;

const WINDOW: Duration = Duration::from_secs(60);

/// Simple in-memory sliding-window limiter keyed by client IP.
pub struct RateLimiter {
    max_requests_per_minute: u32,
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// When called inside a tokio runtime, a background task prunes idle IPs
    /// once a minute.
    pub fn new(max_requests_per_minute: u32) -> Self {
        let limiter = Self {
            max_requests_per_minute,
            requests: Arc::new(Mutex::new(HashMap::new())),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let requests = Arc::downgrade(&limiter.requests);
            handle.spawn(async move {
                loop {
                    tokio::time::sleep(WINDOW).await;
                    let Some(requests) = requests.upgrade() else {
                        break;
                    };
                    let mut map = lock(&requests);
                    let cutoff = Instant::now() - WINDOW;
                    map.retain(|_, timestamps| {
                        timestamps.retain(|t| *t > cutoff);
                        !timestamps.is_empty()
                    });
                    debug!(entries = map.len(), "Rate limiter cleanup");
                }
            });
        }

        limiter
    }

    /// Check if a request from this IP should be allowed, recording it if so.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut map = lock(&self.requests);
        let now = Instant::now();
        let timestamps = map.entry(ip).or_default();

        // Remove stale entries
        timestamps.retain(|t| now.duration_since(*t) < WINDOW);

        if timestamps.len() >= self.max_requests_per_minute as usize {
            warn!(%ip, count = timestamps.len(), limit = self.max_requests_per_minute,
                "Rate limited: too many requests from IP");
            return false;
        }

        timestamps.push(now);
        true
    }

    pub fn tracked_ips(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Middleware rejecting requests over the per-IP limit with 429.
///
/// Requests without a known peer address (e.g. in-process tests) pass through.
pub async fn rate_limit_middleware(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if let Some(ip) = peer {
            if !limiter.check(ip) {
                return ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests", None)
                    .into_response();
            }
        }
    }
    next.run(request).await
}
