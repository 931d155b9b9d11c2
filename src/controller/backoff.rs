//! Per-key exponential requeue delays.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::ObjectKey;

/// Tracks consecutive failures per key and derives the next requeue delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<ObjectKey, u32>,
}

impl Backoff {
    /// Creates a backoff growing from `base` up to `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Records a failure of `key` and returns how long to wait before retrying.
    ///
    /// The delay is `base * 2^failures` capped at `max`. A retry hint in
    /// seconds, such as a server-supplied `Retry-After`, raises it when larger.
    pub fn next_delay(&mut self, key: &ObjectKey, hint_secs: Option<u64>) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let factor = 1_u32.checked_shl(*failures).unwrap_or(u32::MAX);
        *failures = failures.saturating_add(1);

        let delay = self.base.saturating_mul(factor).min(self.max);
        match hint_secs.map(Duration::from_secs) {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }

    /// Forgets the failures of `key` after a successful pass.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Returns the number of consecutive failures recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(500), Duration::from_secs(4))
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let mut backoff = backoff();
        let key = ObjectKey::new("default", "app");

        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay(&key, None)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
        assert_eq!(backoff.failures(&key), 6);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut backoff = backoff();
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");

        backoff.next_delay(&a, None);
        backoff.next_delay(&a, None);

        assert_eq!(backoff.next_delay(&b, None), Duration::from_millis(500));
    }

    #[test]
    fn test_forget_resets() {
        let mut backoff = backoff();
        let key = ObjectKey::new("default", "app");
        backoff.next_delay(&key, None);
        backoff.next_delay(&key, None);

        backoff.forget(&key);

        assert_eq!(backoff.failures(&key), 0);
        assert_eq!(backoff.next_delay(&key, None), Duration::from_millis(500));
    }

    #[test]
    fn test_hint_raises_delay() {
        let mut backoff = backoff();
        let key = ObjectKey::new("default", "app");

        assert_eq!(backoff.next_delay(&key, Some(12)), Duration::from_secs(12));
        // A hint below the computed delay is ignored.
        assert_eq!(backoff.next_delay(&key, Some(0)), Duration::from_secs(1));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = backoff();
        let key = ObjectKey::new("default", "app");
        for _ in 0..100 {
            backoff.next_delay(&key, None);
        }
        assert_eq!(backoff.next_delay(&key, None), Duration::from_secs(4));
    }
}
