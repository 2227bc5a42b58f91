// Anonymous rate limiting.
//
// Unauthenticated callers are not billed, so they get a coarse anti-abuse
// limit instead of a per-user quota: a fixed window per client IP, held
// entirely in process memory. State resets on restart and is not shared
// across instances; both are accepted limitations of this tier.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Anonymous callers get 3 requests per hour.
pub const ANON_MAX_REQUESTS: u32 = 3;
pub const ANON_WINDOW: Duration = Duration::from_secs(60 * 60);

const DENIAL_REASON: &str = "Rate limit exceeded. Sign up for unlimited access!";

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Fixed-window counter keyed by client IP. Checking records the request
/// when allowed; a denied request does not extend the window.
pub struct AnonymousRateLimiter {
    windows: Mutex<HashMap<IpAddr, WindowEntry>>,
    max_requests: u32,
    window: Duration,
}

impl Default for AnonymousRateLimiter {
    fn default() -> Self {
        Self::new(ANON_MAX_REQUESTS, ANON_WINDOW)
    }
}

impl AnonymousRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Check and record a request from `ip`.
    pub async fn check(&self, ip: IpAddr) -> RateDecision {
        self.check_at(ip, Instant::now()).await
    }

    /// Core check with an explicit clock so tests can advance time.
    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().await;

        // Opportunistic cleanup keeps the map from growing unbounded.
        windows.retain(|_, entry| entry.reset_at > now);

        match windows.get_mut(&ip) {
            Some(entry) if entry.reset_at > now => {
                if entry.count >= self.max_requests {
                    return RateDecision {
                        allowed: false,
                        reason: Some(DENIAL_REASON.to_string()),
                    };
                }
                entry.count += 1;
            }
            _ => {
                windows.insert(
                    ip,
                    WindowEntry {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
            }
        }

        RateDecision {
            allowed: true,
            reason: None,
        }
    }
}

/// Client IP from proxy headers, falling back to an unspecified address so
/// callers behind a misconfigured proxy still share one bucket.
pub fn client_ip(headers: &axum::http::HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    forwarded
        .or(real_ip)
        .and_then(|s| s.parse().ok())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = AnonymousRateLimiter::default();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(ip(1), now).await.allowed);
        }

        let fourth = limiter.check_at(ip(1), now).await;
        assert!(!fourth.allowed);
        assert!(fourth.reason.unwrap().contains("Sign up"));
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let limiter = AnonymousRateLimiter::default();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(ip(2), now).await.allowed);
        }
        assert!(!limiter.check_at(ip(2), now).await.allowed);

        let later = now + ANON_WINDOW + Duration::from_secs(1);
        assert!(limiter.check_at(ip(2), later).await.allowed);
    }

    #[tokio::test]
    async fn addresses_are_limited_independently() {
        let limiter = AnonymousRateLimiter::default();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(ip(3), now).await.allowed);
        }
        assert!(!limiter.check_at(ip(3), now).await.allowed);
        assert!(limiter.check_at(ip(4), now).await.allowed);
    }

    #[tokio::test]
    async fn denied_requests_do_not_extend_the_window() {
        let limiter = AnonymousRateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at(ip(5), now).await.allowed);
        // Hammering while denied must not push the reset forward.
        for i in 0..10 {
            let attempt = limiter
                .check_at(ip(5), now + Duration::from_secs(i))
                .await;
            assert!(!attempt.allowed);
        }
        let after = limiter
            .check_at(ip(5), now + Duration::from_secs(61))
            .await;
        assert!(after.allowed);
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_unspecified() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "198.51.100.2".parse::<IpAddr>().unwrap());

        let empty = axum::http::HeaderMap::new();
        assert_eq!(client_ip(&empty), IpAddr::from([0, 0, 0, 0]));
    }
}
