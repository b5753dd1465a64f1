//! Rate limiter for command dispatch.
//!
//! Tracks a request count per key inside a fixed window. A key that goes
//! over the limit is blocked for a longer period before it may try again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

/// Shortest period the background sweeper accepts.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Limits applied per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed inside one window.
    pub max_requests: u32,

    /// Length of the counting window.
    pub window: Duration,

    /// How long a key stays blocked after exceeding the limit.
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        }
    }
}

/// Outcome of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,

    /// Requests left in the current window.
    pub remaining: u32,

    /// When the window resets, or when the block ends for rejected keys.
    pub reset_at: Instant,
}

impl RateDecision {
    /// Whole seconds until `reset_at`, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.reset_at.saturating_duration_since(Instant::now());
        let secs = wait.as_secs();
        if wait.subsec_nanos() > 0 { secs + 1 } else { secs }
    }
}

/// Number of tracked and blocked keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiterStats {
    pub tracked: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    first_request: Instant,
}

#[derive(Debug, Default)]
struct LimiterState {
    requests: HashMap<String, WindowEntry>,
    blocked: HashMap<String, Instant>,
}

/// Keyed windowed rate limiter with escalation to a timed block.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records a request for `key` and decides whether it may proceed.
    pub async fn record(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(&until) = state.blocked.get(key) {
            if now < until {
                return RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: until,
                };
            }
            state.blocked.remove(key);
        }

        let window = self.config.window;
        let entry = state
            .requests
            .entry(key.to_owned())
            .and_modify(|entry| {
                if now.duration_since(entry.first_request) > window {
                    *entry = WindowEntry {
                        count: 0,
                        first_request: now,
                    };
                }
            })
            .or_insert(WindowEntry {
                count: 0,
                first_request: now,
            });

        if entry.count >= self.config.max_requests {
            let until = now + self.config.block_duration;
            state.requests.remove(key);
            state.blocked.insert(key.to_owned(), until);
            warn!(
                "Rate limit exceeded for {}, blocked for {:?}",
                key, self.config.block_duration
            );
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: until,
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.config.max_requests - entry.count,
            reset_at: entry.first_request + window,
        }
    }

    /// Blocks `key` for `duration`, or the configured block duration.
    pub async fn block(&self, key: &str, duration: Option<Duration>) {
        let until = Instant::now() + duration.unwrap_or(self.config.block_duration);
        let mut state = self.state.lock().await;
        state.requests.remove(key);
        state.blocked.insert(key.to_owned(), until);
        info!("Manually blocked {}", key);
    }

    pub async fn unblock(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.blocked.remove(key);
        state.requests.remove(key);
        info!("Unblocked {}", key);
    }

    pub async fn is_blocked(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.blocked.get(key) {
            Some(&until) if Instant::now() < until => true,
            Some(_) => {
                state.blocked.remove(key);
                false
            }
            None => false,
        }
    }

    /// Requests left for `key` in its current window.
    pub async fn remaining(&self, key: &str) -> u32 {
        let state = self.state.lock().await;
        match state.requests.get(key) {
            Some(entry) if entry.first_request.elapsed() <= self.config.window => {
                self.config.max_requests.saturating_sub(entry.count)
            }
            _ => self.config.max_requests,
        }
    }

    /// Drops expired windows and finished blocks. Returns how many entries
    /// were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let mut state = self.state.lock().await;

        let before = state.requests.len() + state.blocked.len();
        state
            .requests
            .retain(|_, entry| now.duration_since(entry.first_request) <= window);
        state.blocked.retain(|_, until| now < *until);
        let cleaned = before - (state.requests.len() + state.blocked.len());

        if cleaned > 0 {
            debug!("Rate limiter sweep removed {} entries", cleaned);
        }
        cleaned
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.requests.clear();
        state.blocked.clear();
        info!("Rate limiter cleared");
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        RateLimiterStats {
            tracked: state.requests.len(),
            blocked: state.blocked.len(),
        }
    }

    /// Spawns a task that sweeps the limiter every `period`.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period.max(MIN_SWEEP_PERIOD));
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        })
    }
}

/// Composite limiter key for a sender and command.
#[must_use]
pub fn rate_limit_key(sender_id: i64, command: &str) -> String {
    format!("{sender_id}:{command}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_max() {
        let limiter = limiter(3);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.record("42:ping").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.record("42:ping").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_holds_until_reset() {
        let limiter = limiter(1);
        assert!(limiter.record("k").await.allowed);

        let rejected = limiter.record("k").await;
        assert!(!rejected.allowed);

        tokio::time::advance(Duration::from_secs(299)).await;
        let still = limiter.record("k").await;
        assert!(!still.allowed);
        assert_eq!(still.reset_at, rejected.reset_at);
        assert_eq!(still.retry_after_secs(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.record("k").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = limiter(2);
        assert!(limiter.record("k").await.allowed);
        assert!(limiter.record("k").await.allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        let decision = limiter.record("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.record(&rate_limit_key(42, "ping")).await.allowed);
        assert!(limiter.record(&rate_limit_key(42, "echo")).await.allowed);
        assert!(limiter.record(&rate_limit_key(7, "ping")).await.allowed);
        assert!(!limiter.record(&rate_limit_key(42, "ping")).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_block_and_unblock() {
        let limiter = limiter(5);
        limiter.block("k", Some(Duration::from_secs(10))).await;
        assert!(limiter.is_blocked("k").await);
        assert!(!limiter.record("k").await.allowed);

        limiter.unblock("k").await;
        assert!(!limiter.is_blocked("k").await);
        assert!(limiter.record("k").await.allowed);
        assert_eq!(limiter.remaining("k").await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let limiter = limiter(1);
        limiter.record("a").await;
        limiter.record("b").await;
        limiter.record("b").await;

        assert_eq!(
            limiter.stats().await,
            RateLimiterStats {
                tracked: 1,
                blocked: 1
            }
        );

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(limiter.sweep().await, 2);
        assert_eq!(limiter.stats().await, RateLimiterStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_with_zero_period() {
        let limiter = Arc::new(limiter(1));
        limiter.record("a").await;

        let sweeper = limiter.spawn_sweeper(Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!sweeper.is_finished());
        assert_eq!(limiter.stats().await, RateLimiterStats::default());
        sweeper.abort();
    }
}
