//! Failed-login rate limiter.
//!
//! Tracks failed attempts per principal and per source address over a
//! sliding window. Either key reaching the cap blocks further attempts for
//! both, so a distributed guesser burning one username and a single host
//! spraying many usernames are both cut off.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::env;

/// Sliding-window failed-login counter.
pub struct RateLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: DashMap<String, Vec<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(env::RATE_LIMIT_MAX_ATTEMPTS, env::RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter allowing `max_attempts` failures per `window` per key.
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: DashMap::new(),
        }
    }

    fn user_key(username: &str) -> String {
        format!("user:{}", username.to_lowercase())
    }

    fn ip_key(address: &str) -> String {
        format!("ip:{}", address)
    }

    fn windowed_count(&self, key: &str) -> usize {
        match self.attempts.get_mut(key) {
            Some(mut entry) => {
                let window = self.window;
                entry.retain(|t| t.elapsed() <= window);
                entry.len()
            }
            None => 0,
        }
    }

    /// Whether either the username or the source address is at the cap.
    pub fn is_blocked(&self, username: &str, address: &str) -> bool {
        self.windowed_count(&Self::user_key(username)) >= self.max_attempts
            || self.windowed_count(&Self::ip_key(address)) >= self.max_attempts
    }

    /// Record a failed attempt under both keys.
    pub fn record_failure(&self, username: &str, address: &str) {
        let now = Instant::now();
        for key in [Self::user_key(username), Self::ip_key(address)] {
            let mut entry = self.attempts.entry(key).or_default();
            entry.retain(|t| t.elapsed() <= self.window);
            entry.push(now);
        }
    }

    /// Clear both keys after a successful login.
    pub fn clear_on_success(&self, username: &str, address: &str) {
        self.attempts.remove(&Self::user_key(username));
        self.attempts.remove(&Self::ip_key(address));
    }

    /// Seconds until the oldest relevant failure ages out, 0 if not blocked.
    pub fn lockout_remaining_secs(&self, username: &str, address: &str) -> u64 {
        if !self.is_blocked(username, address) {
            return 0;
        }
        let oldest = [Self::user_key(username), Self::ip_key(address)]
            .iter()
            .filter_map(|key| self.attempts.get(key))
            .filter_map(|entry| entry.iter().max_by_key(|t| t.elapsed()).copied())
            .max_by_key(|t| t.elapsed());

        match oldest {
            Some(t) => self.window.saturating_sub(t.elapsed()).as_secs(),
            None => 0,
        }
    }
}
