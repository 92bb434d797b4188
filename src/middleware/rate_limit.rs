//! Per-IP rate limiting for the public API.
//!
//! Fixed-window counter per client IP. The window and limit default to the
//! public contract (60 requests per 60 seconds) and can be tuned via
//! constructor config.

use crate::api::ApiError;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Rate limiter state tracking request counts per IP.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, WindowEntry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request against `ip`; true while within the limit.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count <= self.config.max_requests
    }
}

/// Resolve the client IP, preferring `X-Forwarded-For` behind a proxy.
fn client_ip(req: &Request<Body>, fallback: IpAddr) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(fallback)
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req, addr.ip());
    if !limiter.allow(ip) {
        warn!(%ip, "public rate limit exceeded");
        return Err(ApiError::rate_limited());
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: max,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(3);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn limits_are_per_ip() {
        let limiter = limiter(1);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }

    #[test]
    fn window_reset_restores_allowance() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(0),
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(ip));
        // Zero-length window: every request starts a fresh window.
        assert!(limiter.allow(ip));
    }
}
