//! Rate limiting middleware.
//!
//! Fixed-window rate limiting per client IP, applied to the auth endpoints
//! only. A tripped limiter rejects before any credential work happens.

use crate::api::error::ApiError;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum attempts per window.
    pub max_attempts: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Rate limiter state tracking attempts per IP.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, WindowEntry>>>,
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record one attempt and report whether it is allowed.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        // Opportunistic pruning keeps the map bounded without a sweeper task.
        if state.len() > 1024 {
            let window = self.config.window;
            state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
        }

        let entry = state.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        entry.count <= self.config.max_attempts
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();

    if limiter.check(ip) {
        next.run(request).await
    } else {
        warn!(ip = %ip, "Too many auth attempts");
        ApiError::RateLimited.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_capacity() {
        let limiter = RateLimitLayer::new(RateLimitConfig::default());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check(ip));
        }
        // Sixth attempt in the window trips the limiter.
        assert!(!limiter.check(ip));
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_attempts: 2,
            window: Duration::from_millis(10),
        });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check(ip));
    }

    #[test]
    fn test_addresses_are_independent() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_attempts: 1,
            window: Duration::from_secs(60),
        });
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }
}
