//! Per-key sliding-window rate limiting.
//!
//! One window per API key, held in process memory with explicit eviction of
//! expired timestamps. Each stateless instance enforces its own window; no
//! global shared state.

use std::collections::VecDeque;

use dashmap::DashMap;

use courant_common::now_ms;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum invocations per key within the window.
    pub max_per_window: usize,
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 60,
            window_ms: 60_000,
        }
    }
}

pub struct RateLimiter {
    windows: DashMap<String, VecDeque<i64>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Record an invocation for `key`. `Err` carries the window length in
    /// seconds for the error message.
    pub fn check(&self, key: &str) -> Result<(), i64> {
        self.check_at(key, now_ms())
    }

    pub(crate) fn check_at(&self, key: &str, now: i64) -> Result<(), i64> {
        let cutoff = now - self.config.window_ms;
        let mut window = self.windows.entry(key.to_string()).or_default();

        while window.front().is_some_and(|&ts| ts < cutoff) {
            window.pop_front();
        }

        if window.len() >= self.config.max_per_window {
            return Err(self.config.window_ms / 1_000);
        }

        window.push_back(now);
        Ok(())
    }
}
