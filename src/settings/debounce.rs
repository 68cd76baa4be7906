//! Suppression of duplicate change notifications
//!
//! A single edit can surface as several notifications for the same key (one
//! per layer, plus whatever the file watcher repeats). The first one opens a
//! window; anything else for that key inside the window is dropped. The
//! window is not extended by dropped notifications.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

pub struct Debouncer {
    window: Duration,
    open: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            open: HashMap::new(),
        }
    }

    /// Returns true if this notification should be processed
    pub fn accept(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.open.retain(|_, opened| now.duration_since(*opened) < window);

        if self.open.contains_key(key) {
            return false;
        }
        self.open.insert(key.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_window_is_dropped() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(debouncer.accept("pylsp.plugins.flake8.enabled"));
        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(!debouncer.accept("pylsp.plugins.flake8.enabled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_window_is_accepted() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(debouncer.accept("k"));
        tokio::time::advance(Duration::from_millis(11)).await;
        assert!(debouncer.accept("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_notifications_do_not_extend_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(debouncer.accept("k"));
        tokio::time::advance(Duration::from_millis(8)).await;
        assert!(!debouncer.accept("k"));
        tokio::time::advance(Duration::from_millis(3)).await;
        assert!(debouncer.accept("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(debouncer.accept("a"));
        assert!(debouncer.accept("b"));
        assert!(!debouncer.accept("a"));
    }
}
