//! Rate limiter for throttling login attempts per account

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Longest ban applied, whatever the configuration asks for
const MAX_BAN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of attempts allowed
    pub max_attempts: u32,
    /// Time window in seconds
    pub window_seconds: u64,
    /// Ban duration in seconds
    pub ban_duration_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_seconds: 300,       // 5 minutes
            ban_duration_seconds: 900, // 15 minutes
        }
    }
}

impl RateLimiterConfig {
    /// Create a new RateLimiterConfig from environment variables
    ///
    /// # Environment Variables
    /// - `LOGIN_MAX_ATTEMPTS`: Attempts allowed per window (default: 5)
    /// - `LOGIN_WINDOW_SECS`: Window length in seconds (default: 300)
    /// - `LOGIN_BAN_SECS`: Ban length in seconds (default: 900)
    ///
    /// Unparsable values fall back to the default. Bans are capped at one year.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_attempts: read_env("LOGIN_MAX_ATTEMPTS", defaults.max_attempts),
            window_seconds: read_env("LOGIN_WINDOW_SECS", defaults.window_seconds),
            ban_duration_seconds: read_env("LOGIN_BAN_SECS", defaults.ban_duration_seconds)
                .min(MAX_BAN_SECONDS),
        }
    }

    fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_seconds.min(MAX_BAN_SECONDS))
    }
}

fn read_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Rate limiter entry
#[derive(Debug)]
struct RateLimiterEntry {
    /// Number of attempts
    attempts: u32,
    /// Last attempt time
    last_attempt: Instant,
    /// Ban expiration time
    ban_expires: Option<Instant>,
}

impl RateLimiterEntry {
    /// Neither banned nor inside a window any more
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.ban_expires.is_none_or(|expires| now >= expires)
            && now.duration_since(self.last_attempt) >= window
    }
}

#[derive(Debug)]
struct LimiterState {
    entries: HashMap<String, RateLimiterEntry>,
    last_eviction: Instant,
}

impl LimiterState {
    fn evict_stale(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(now, window));
        self.last_eviction = now;
        before - self.entries.len()
    }
}

/// Rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Rate limiter configuration
    config: RateLimiterConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(LimiterState {
                entries: HashMap::new(),
                last_eviction: Instant::now(),
            })),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    /// Record an attempt for `key` and report whether it may proceed.
    /// Stale keys are dropped at most once per window.
    pub async fn is_allowed(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.last_eviction) >= self.window() {
            let evicted = state.evict_stale(now, self.window());
            if evicted > 0 {
                debug!(evicted, "Evicted stale rate limiter entries");
            }
        }

        let entry = state.entries.entry(key.to_string()).or_insert(RateLimiterEntry {
            attempts: 0,
            last_attempt: now,
            ban_expires: None,
        });

        if let Some(ban_expires) = entry.ban_expires {
            if now >= ban_expires {
                entry.attempts = 0;
                entry.ban_expires = None;
            } else {
                return false;
            }
        }

        if now.duration_since(entry.last_attempt) >= self.window() {
            entry.attempts = 0;
        }

        if entry.attempts >= self.config.max_attempts {
            entry.ban_expires = Some(now + self.config.ban_duration());
            info!(
                "Banned key {} for {} seconds",
                key,
                self.config.ban_duration().as_secs()
            );
            return false;
        }

        entry.attempts += 1;
        entry.last_attempt = now;

        true
    }

    /// Forget the attempts recorded for `key`
    pub async fn reset(&self, key: &str) {
        self.state.lock().await.entries.remove(key);
    }

    /// Drop every key that is neither banned nor inside its window
    pub async fn evict_stale(&self) -> usize {
        self.state.lock().await.evict_stale(Instant::now(), self.window())
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn limiter(max_attempts: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_attempts,
            window_seconds: 60,
            ban_duration_seconds: 60,
        })
    }

    #[tokio::test]
    async fn test_bans_after_max_attempts() {
        let limiter = limiter(2);
        assert!(limiter.is_allowed("a@x.test").await);
        assert!(limiter.is_allowed("a@x.test").await);
        assert!(!limiter.is_allowed("a@x.test").await);
        assert!(!limiter.is_allowed("a@x.test").await);

        assert!(limiter.is_allowed("b@x.test").await);
    }

    #[tokio::test]
    async fn test_reset_clears_attempts() {
        let limiter = limiter(1);
        assert!(limiter.is_allowed("a@x.test").await);
        limiter.reset("a@x.test").await;
        assert!(limiter.is_allowed("a@x.test").await);
    }

    #[tokio::test]
    async fn test_stale_keys_are_evicted() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts: 5,
            window_seconds: 1,
            ban_duration_seconds: 1,
        });
        for i in 0..1_000 {
            assert!(limiter.is_allowed(&format!("user{i}@x.test")).await);
        }
        assert_eq!(limiter.tracked_keys().await, 1_000);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(limiter.is_allowed("late@x.test").await);
        assert_eq!(limiter.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn test_banned_keys_survive_eviction() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts: 1,
            window_seconds: 1,
            ban_duration_seconds: 60,
        });
        assert!(limiter.is_allowed("a@x.test").await);
        assert!(!limiter.is_allowed("a@x.test").await);
        assert!(limiter.is_allowed("b@x.test").await);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(limiter.evict_stale().await, 1);
        assert!(!limiter.is_allowed("a@x.test").await);
    }

    #[test]
    #[serial]
    fn test_config_rejects_out_of_range_values() {
        unsafe {
            std::env::set_var("LOGIN_MAX_ATTEMPTS", "4294967296");
            std::env::set_var("LOGIN_WINDOW_SECS", "60");
            std::env::set_var("LOGIN_BAN_SECS", u64::MAX.to_string());
        }

        let config = RateLimiterConfig::from_env();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.window_seconds, 60);
        assert_eq!(config.ban_duration_seconds, MAX_BAN_SECONDS);

        unsafe {
            std::env::remove_var("LOGIN_MAX_ATTEMPTS");
            std::env::remove_var("LOGIN_WINDOW_SECS");
            std::env::remove_var("LOGIN_BAN_SECS");
        }
    }

    #[tokio::test]
    async fn test_huge_ban_does_not_overflow() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts: 1,
            window_seconds: 60,
            ban_duration_seconds: u64::MAX,
        });
        assert!(limiter.is_allowed("a@x.test").await);
        assert!(!limiter.is_allowed("a@x.test").await);
    }
}
