//! Fixed-window, per-client request limiter kept in process memory

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::errors::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count one request for `client`; fails once the window's budget is spent
    pub fn check(&self, client: &str) -> ServiceResult<()> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> ServiceResult<()> {
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        if entry.count >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            // rounded up so a client never retries inside the window
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(ServiceError::RateLimited {
                retry_after_secs: secs.max(1),
            });
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have expired so idle clients don't accumulate
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_window_reset() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.check_at("1.2.3.4", t0).is_ok());
        assert!(limiter.check_at("1.2.3.4", t0).is_ok());
        match limiter.check_at("1.2.3.4", t0 + Duration::from_secs(15)) {
            Err(ServiceError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 45),
            other => panic!("expected rate limit, got {:?}", other),
        }

        // other clients are unaffected
        assert!(limiter.check_at("5.6.7.8", t0).is_ok());

        assert!(limiter.check_at("1.2.3.4", t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at("1.2.3.4", t0).is_ok());

        match limiter.check_at("1.2.3.4", t0 + Duration::from_millis(15_500)) {
            Err(ServiceError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 45),
            other => panic!("expected rate limit, got {:?}", other),
        }
        match limiter.check_at("1.2.3.4", t0 + Duration::from_millis(59_999)) {
            Err(ServiceError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_sweep_removes_idle_clients() {
        let limiter = RateLimiter::new(1, Duration::from_millis(1));
        limiter.check("a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.sweep(), 0);
    }
}
