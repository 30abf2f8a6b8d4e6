//! Keyed anti-spam for recurring failures.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, warn};

#[derive(Default)]
pub struct LogOnce {
    seen: Mutex<HashSet<String>>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at `warn` the first time `key` is seen, at `debug` afterwards.
    /// Returns true on the first occurrence.
    pub fn warn(&self, key: &str, message: &str) -> bool {
        let first = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string()),
        };
        if first {
            warn!(key = %key, "{message}");
        } else {
            debug!(key = %key, "{message}");
        }
        first
    }

    /// Forgets `key` so the next failure is reported again.
    pub fn reset(&self, key: &str) {
        match self.seen.lock() {
            Ok(mut seen) => seen.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_only() {
        let once = LogOnce::new();
        assert!(once.warn("status:parse", "Status.json unreadable"));
        assert!(!once.warn("status:parse", "Status.json unreadable"));
        assert!(once.warn("market:parse", "Market.json unreadable"));
        once.reset("status:parse");
        assert!(once.warn("status:parse", "Status.json unreadable"));
    }
}
