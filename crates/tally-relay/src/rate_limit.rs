//! Per-client token buckets in front of the whole router.
//!
//! Clients are identified by IP: the connection's peer address, or the
//! first hop of `X-Forwarded-For` / `X-Real-IP` behind a proxy. Requests
//! with no identifiable address pass through unmetered.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl Bucket {
    /// Refill for the time since the last touch, then spend one token.
    fn spend(&mut self, now: Instant, per_sec: f64, burst: f64) -> bool {
        let idle = now.saturating_duration_since(self.touched).as_secs_f64();
        self.tokens = (self.tokens + idle * per_sec).min(burst);
        self.touched = now;
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    /// `per_sec` sustained requests per client, bursts up to `burst`.
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_sec: per_sec.max(0.0),
            burst: burst.max(1.0),
        }
    }

    pub async fn allow(&self, client: IpAddr) -> bool {
        self.allow_at(client, Instant::now()).await
    }

    async fn allow_at(&self, client: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        let burst = self.burst;
        buckets
            .entry(client)
            .or_insert(Bucket {
                tokens: burst,
                touched: now,
            })
            .spend(now, self.per_sec, burst)
    }

    /// Forget clients not seen for `max_idle`. Returns how many were dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.touched.elapsed() < max_idle);
        before - buckets.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    match client_ip(&req) {
        Some(ip) if !limiter.allow(ip).await => {
            tracing::warn!(%ip, path = %req.uri().path(), "rate limited");
            Err(ServerError::RateLimited)
        }
        _ => Ok(next.run(req).await),
    }
}

fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(peer.ip());
    }
    ["x-forwarded-for", "x-real-ip"].into_iter().find_map(|name| {
        let value = req.headers().get(name)?.to_str().ok()?;
        value.split(',').next()?.trim().parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_burst_then_throttled() {
        let limiter = RateLimiter::new(1.0, 3.0);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at(ip("127.0.0.1"), now).await);
        }
        assert!(!limiter.allow_at(ip("127.0.0.1"), now).await);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(2.0, 2.0);
        let start = Instant::now();
        let client = ip("10.1.1.1");
        assert!(limiter.allow_at(client, start).await);
        assert!(limiter.allow_at(client, start).await);
        assert!(!limiter.allow_at(client, start).await);

        // Half a second at 2/s buys exactly one more request.
        let later = start + Duration::from_millis(500);
        assert!(limiter.allow_at(client, later).await);
        assert!(!limiter.allow_at(client, later).await);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(0.0, 1.0);
        assert!(limiter.allow(ip("10.0.0.1")).await);
        assert!(!limiter.allow(ip("10.0.0.1")).await);
        assert!(limiter.allow(ip("10.0.0.2")).await);
        assert_eq!(limiter.tracked_clients().await, 2);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let limiter = RateLimiter::new(10.0, 5.0);
        limiter.allow(ip("192.168.1.1")).await;
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)).await, 0);
        assert_eq!(limiter.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[test]
    fn test_client_ip_sources() {
        let forwarded = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&forwarded), Some(ip("203.0.113.7")));

        let real = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&real), Some(ip("198.51.100.2")));

        let garbage = Request::builder()
            .header("x-forwarded-for", "not-an-ip")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&garbage), None);

        assert_eq!(client_ip(&Request::builder().body(()).unwrap()), None);
    }
}
