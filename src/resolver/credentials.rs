use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{RATE_CAPACITY, RATE_WINDOW_SECS};

/// Vision model API keys in rotation order, plus the rolling request window
/// that throttles calls made with the active key.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<String>,
    index: usize,
    window: VecDeque<Instant>,
    window_len: Duration,
    capacity: usize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<String>) -> Self {
        Self::with_limits(credentials, RATE_CAPACITY, Duration::from_secs(RATE_WINDOW_SECS))
    }

    pub fn with_limits(credentials: Vec<String>, capacity: usize, window_len: Duration) -> Self {
        Self {
            credentials: credentials
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            index: 0,
            window: VecDeque::with_capacity(capacity),
            window_len,
            capacity: capacity.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&str> {
        self.credentials.get(self.index).map(String::as_str)
    }

    /// Moves to the next key, wrapping to the first, and starts a fresh window
    /// since quotas are per key. Returns the new index.
    pub fn advance(&mut self) -> usize {
        if !self.credentials.is_empty() {
            self.index = (self.index + 1) % self.credentials.len();
        }
        self.window.clear();
        self.index
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= self.window_len {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait before another call fits in the window, if at all.
    pub fn wait_needed(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.window.len() < self.capacity {
            return None;
        }
        let oldest = *self.window.front()?;
        let wait = (oldest + self.window_len).saturating_duration_since(now);
        Some(wait.max(Duration::from_millis(1)))
    }

    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.window.push_back(now);
    }

    pub fn requests_in_window(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("key-{i}")).collect()
    }

    #[test]
    fn advance_wraps_to_first_key() {
        let mut pool = CredentialPool::new(keys(3));
        assert_eq!(pool.current(), Some("key-1"));
        assert_eq!(pool.advance(), 1);
        assert_eq!(pool.advance(), 2);
        assert_eq!(pool.advance(), 0);
        assert_eq!(pool.current(), Some("key-1"));
    }

    #[test]
    fn blank_keys_are_ignored() {
        let pool = CredentialPool::new(vec![" ".to_string(), String::new()]);
        assert!(pool.is_empty());
        assert_eq!(pool.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn window_fills_then_drains() {
        let mut pool = CredentialPool::with_limits(keys(1), 2, Duration::from_secs(60));
        let start = Instant::now();

        pool.record(start);
        assert_eq!(pool.wait_needed(start), None);
        pool.record(start + Duration::from_secs(10));

        let now = start + Duration::from_secs(20);
        assert_eq!(pool.wait_needed(now), Some(Duration::from_secs(40)));

        let later = start + Duration::from_secs(60);
        assert_eq!(pool.wait_needed(later), None);
        assert_eq!(pool.requests_in_window(), 1);
    }

    #[tokio::test]
    async fn advancing_resets_the_window() {
        let mut pool = CredentialPool::with_limits(keys(2), 1, Duration::from_secs(60));
        let now = Instant::now();
        pool.record(now);
        assert!(pool.wait_needed(now).is_some());
        pool.advance();
        assert_eq!(pool.wait_needed(now), None);
    }
}
