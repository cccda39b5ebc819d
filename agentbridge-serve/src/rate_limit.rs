//! Fixed one-minute-window rate limiter keyed by client IP (spec §6 rate limiting).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_per_minute: u32,
    windows: DashMap<String, Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            windows: DashMap::new(),
        }
    }

    /// `true` if the request for `client_key` is allowed under the current window.
    pub fn allow(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let entry = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| Mutex::new(Window { started_at: now, count: 0 }));
        let mut window = entry.lock().unwrap();
        if now.duration_since(window.started_at) >= Duration::from_secs(60) {
            window.started_at = now;
            window.count = 0;
        }
        if window.count >= self.max_per_minute {
            return false;
        }
        window.count += 1;
        true
    }
}

/// Picks the client identity to rate-limit on: `X-Forwarded-For` (first hop),
/// `CF-Connecting-IP`, falling back to `"unknown"` so unattributable traffic shares a
/// single (generous) bucket rather than bypassing the limiter entirely.
pub fn client_key(headers: &axum::http::HeaderMap) -> String {
    if let Some(v) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = v.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(v) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        if !v.is_empty() {
            return v.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("c1"));
        assert!(limiter.allow("c1"));
        assert!(!limiter.allow("c1"));
    }

    #[test]
    fn separate_keys_have_independent_windows() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("c1"));
        assert!(limiter.allow("c2"));
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
        assert_eq!(client_key(&headers), "1.2.3.4");
    }

    #[test]
    fn client_key_falls_back_to_unknown() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(client_key(&headers), "unknown");
    }
}
