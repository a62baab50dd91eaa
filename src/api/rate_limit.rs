//! Per-client request throttling for `POST /graphql`.
//!
//! Each (client IP, tier) pair owns a bucket that refills over the
//! configured window. Public operations (login, register, invitation checks)
//! draw from the `Auth` tier, which is much smaller than the `Api` tier, so
//! password guessing hits the limit first. Requests that `graphql_auth`
//! rejects are charged to the `Auth` tier as well, which throttles token
//! guessing before it ever reaches this layer.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::auth::OperationAccess;
use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Operations that need a session
    Api,
    /// Operations on the public allow-list
    Auth,
}

impl From<OperationAccess> for RateLimitTier {
    fn from(access: OperationAccess) -> Self {
        match access {
            OperationAccess::Public => RateLimitTier::Auth,
            OperationAccess::Protected => RateLimitTier::Api,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    remaining: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            remaining: capacity,
            window_start: now,
            last_seen: now,
        }
    }

    /// Start a fresh window once the old one has passed, otherwise trickle
    /// back a share of the capacity for the time since the last refill.
    /// Time too short to earn a whole request carries over to the next call.
    fn refill(&mut self, capacity: u32, window: Duration, now: Instant) {
        if now.duration_since(self.window_start) >= window {
            *self = Bucket::full(capacity, now);
            return;
        }
        if self.remaining >= capacity {
            self.last_seen = now;
            return;
        }
        let idle = now.duration_since(self.last_seen).as_secs_f64();
        let earned = (idle * capacity as f64 / window.as_secs_f64()) as u32;
        if earned == 0 {
            return;
        }
        self.remaining = self.remaining.saturating_add(earned).min(capacity);
        self.last_seen += window.mul_f64(earned as f64 / capacity as f64);
    }
}

/// The outcome of an allowed request, echoed back as `X-RateLimit-*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window ends
    pub reset_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, RateLimitTier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    /// Take one request from the client's bucket. `Err` carries the number
    /// of seconds to wait.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<Allowance, u64> {
        if !self.config.enabled {
            return Ok(Allowance {
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_after: 0,
            });
        }

        let capacity = self.limit_for(tier);
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((ip, tier))
            .or_insert_with(|| Bucket::full(capacity, now));
        bucket.refill(capacity, self.window, now);

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(bucket.window_start))
            .as_secs();
        if bucket.remaining == 0 {
            return Err(reset_after.max(1));
        }

        bucket.remaining -= 1;
        Ok(Allowance {
            limit: capacity,
            remaining: bucket.remaining,
            reset_after,
        })
    }

    pub fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Forget clients that have been quiet for two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let keep_for = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < keep_for);
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client address: the first `X-Forwarded-For` hop, then `X-Real-IP`, then
/// the socket peer. Requests without any of these count as localhost.
pub(super) fn client_ip(request: &Request<Body>) -> IpAddr {
    let headers = request.headers();
    let forwarded: Option<IpAddr> = header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    let real_ip = || {
        header_str(headers, "x-real-ip").and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    forwarded
        .or_else(real_ip)
        .or_else(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Throttle `POST /graphql`. The tier comes from the `OperationAccess`
/// that `graphql_auth` stored, so this layer must sit inside that one.
pub async fn rate_limit_graphql(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let tier = request
        .extensions()
        .get::<OperationAccess>()
        .copied()
        .map(RateLimitTier::from)
        .unwrap_or(RateLimitTier::Api);
    let ip = client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Ok(allowance) => {
            let mut response = next.run(request).await;
            set_limit_headers(
                response.headers_mut(),
                allowance.limit,
                allowance.remaining,
                allowance.reset_after,
            );
            response
        }
        Err(retry_after) => too_many_requests(&state.rate_limiter, tier, ip, retry_after),
    }
}

/// The 429 sent once a client's bucket is empty
pub(super) fn too_many_requests(
    limiter: &RateLimiter,
    tier: RateLimitTier,
    ip: IpAddr,
    retry_after: u64,
) -> Response {
    tracing::warn!(%ip, ?tier, retry_after, "Rate limit exceeded");
    let mut response = ApiError::rate_limited(format!(
        "Rate limit exceeded. Try again in {} seconds.",
        retry_after
    ))
    .into_response();
    let headers = response.headers_mut();
    headers.insert("Retry-After", HeaderValue::from(retry_after));
    set_limit_headers(headers, limiter.limit_for(tier), 0, retry_after);
    response
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_after: u64) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));
}

/// Periodically drop idle buckets
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                buckets = rate_limiter.entry_count(),
                "Rate limiter cleanup complete"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(api: u32, auth: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            window_seconds: 60,
            api_requests_per_window: api,
            auth_requests_per_window: auth,
        })
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_login_attempts_run_out() {
        let limiter = limiter(100, 3);
        let client = ip("203.0.113.7");

        let remaining: Vec<u32> = (0..3)
            .map(|_| limiter.check(client, RateLimitTier::Auth).unwrap().remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let retry_after = limiter.check(client, RateLimitTier::Auth).unwrap_err();
        assert!((1..=60).contains(&retry_after));
    }

    #[test]
    fn test_tiers_and_clients_are_independent() {
        let limiter = limiter(2, 1);
        let client = ip("203.0.113.7");

        assert!(limiter.check(client, RateLimitTier::Auth).is_ok());
        assert!(limiter.check(client, RateLimitTier::Auth).is_err());

        // Same client, session-backed operations
        assert!(limiter.check(client, RateLimitTier::Api).is_ok());
        // Another client, public operations
        assert!(limiter.check(ip("2001:db8::1"), RateLimitTier::Auth).is_ok());
        assert_eq!(limiter.entry_count(), 3);
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            auth_requests_per_window: 1,
            ..RateLimitConfig::default()
        });

        for _ in 0..50 {
            assert!(limiter.check(ip("203.0.113.7"), RateLimitTier::Auth).is_ok());
        }
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_public_operations_use_auth_tier() {
        assert_eq!(RateLimitTier::from(OperationAccess::Public), RateLimitTier::Auth);
        assert_eq!(RateLimitTier::from(OperationAccess::Protected), RateLimitTier::Api);

        let limiter = limiter(10, 5);
        assert_eq!(limiter.limit_for(RateLimitTier::Auth), 5);
        assert_eq!(limiter.limit_for(RateLimitTier::Api), 10);
    }

    #[test]
    fn test_refill() {
        let start = Instant::now();
        let window = Duration::from_secs(60);
        let mut bucket = Bucket::full(4, start);
        bucket.remaining = 0;

        // Half the window idle earns back half the capacity
        bucket.refill(4, window, start + Duration::from_secs(30));
        assert_eq!(bucket.remaining, 2);

        bucket.refill(4, window, start + Duration::from_secs(61));
        assert_eq!(bucket.remaining, 4);
    }

    #[test]
    fn test_frequent_polling_still_refills() {
        let start = Instant::now();
        let window = Duration::from_secs(60);
        let mut bucket = Bucket::full(4, start);
        bucket.remaining = 0;

        // One request is earned every 15 seconds; polls every 10 seconds
        // must not lose the partial time in between
        bucket.refill(4, window, start + Duration::from_secs(10));
        assert_eq!(bucket.remaining, 0);
        bucket.refill(4, window, start + Duration::from_secs(20));
        assert_eq!(bucket.remaining, 1);
        bucket.refill(4, window, start + Duration::from_secs(30));
        assert_eq!(bucket.remaining, 2);
        bucket.refill(4, window, start + Duration::from_secs(40));
        assert_eq!(bucket.remaining, 2);
    }

    #[test]
    fn test_cleanup_keeps_recent_buckets() {
        let limiter = limiter(10, 5);
        let _ = limiter.check(ip("203.0.113.7"), RateLimitTier::Api);
        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 1);
    }

    #[test]
    fn test_client_ip_sources() {
        let request = Request::builder()
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .header("x-real-ip", "198.51.100.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), ip("198.51.100.4"));

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), ip("198.51.100.9"));

        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&request), ip("192.0.2.1"));

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
