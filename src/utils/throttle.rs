//! Log throttling
//!
//! Limits how often the same diagnostic line is emitted, so a detached host
//! hammering the gadget write path with EAGAIN does not flood the log.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Per-key minimum interval between log lines
pub struct LogThrottler {
    last_logged: RwLock<HashMap<&'static str, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns true when the message keyed by `key` should be logged and
    /// stamps the key; false while the interval has not elapsed.
    pub fn should_log(&self, key: &'static str) -> bool {
        let now = Instant::now();
        {
            let map = self.last_logged.read().unwrap();
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.interval {
                    return false;
                }
            }
        }
        let mut map = self.last_logged.write().unwrap();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key, now);
        true
    }

    /// Forget a key so the next occurrence logs immediately. Call on
    /// recovery from the error condition.
    pub fn clear(&self, key: &'static str) {
        self.last_logged.write().unwrap().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("key"));
        assert!(!throttler.should_log("key"));
        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("key"));
    }

    #[test]
    fn test_keys_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("a"));
        assert!(throttler.should_log("b"));
        assert!(!throttler.should_log("a"));
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("key"));
        throttler.clear("key");
        assert!(throttler.should_log("key"));
    }
}
