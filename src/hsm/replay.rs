use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Default number of consumed challenges remembered
pub const DEFAULT_REPLAY_WINDOW_SIZE: usize = 128;

/// Bounded memory of challenges that were already answered.
///
/// Entries leave the window when it is full (oldest first) or once their
/// TTL has passed; an expired challenge can no longer be answered anyway.
#[derive(Debug, Clone)]
pub struct ConsumedChallenges {
    /// (challenge id, consumed at) in consumption order
    window: VecDeque<(String, DateTime<Utc>)>,

    /// Maximum window size
    window_size: usize,

    /// How long a consumed id is remembered
    ttl: Duration,
}

impl ConsumedChallenges {
    pub fn new(window_size: usize, ttl: Duration) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            ttl,
        }
    }

    /// Remember a challenge id as consumed
    pub fn record(&mut self, challenge_id: &str, now: DateTime<Utc>) {
        self.evict_expired(now);

        if self.window_size == 0 {
            return;
        }

        self.window.push_back((challenge_id.to_string(), now));

        // Maintain window size
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
    }

    /// Whether `challenge_id` was consumed within the TTL
    pub fn was_consumed(&self, challenge_id: &str, now: DateTime<Utc>) -> bool {
        self.window
            .iter()
            .any(|(id, at)| id == challenge_id && now - *at < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Forget everything (e.g. after an operator-forced rotation)
    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some((_, at)) = self.window.front() {
            if now - *at >= self.ttl {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumed_challenge_detected() {
        let now = Utc::now();
        let mut consumed = ConsumedChallenges::new(8, Duration::seconds(30));

        assert!(!consumed.was_consumed("abcd", now));
        consumed.record("abcd", now);
        assert!(consumed.was_consumed("abcd", now + Duration::seconds(1)));
        assert!(!consumed.was_consumed("ef01", now));
    }

    #[test]
    fn test_window_size_bounded() {
        let now = Utc::now();
        let mut consumed = ConsumedChallenges::new(3, Duration::seconds(30));

        for id in ["a", "b", "c", "d"] {
            consumed.record(id, now);
        }

        assert_eq!(consumed.len(), 3);
        assert!(!consumed.was_consumed("a", now));
        assert!(consumed.was_consumed("d", now));
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let now = Utc::now();
        let mut consumed = ConsumedChallenges::new(8, Duration::seconds(30));
        consumed.record("abcd", now);

        assert!(!consumed.was_consumed("abcd", now + Duration::seconds(30)));

        consumed.record("ef01", now + Duration::seconds(31));
        assert_eq!(consumed.len(), 1);
    }

    #[test]
    fn test_zero_window_remembers_nothing() {
        let now = Utc::now();
        let mut consumed = ConsumedChallenges::new(0, Duration::seconds(30));
        consumed.record("abcd", now);
        assert!(consumed.is_empty());
    }

    #[test]
    fn test_reset() {
        let now = Utc::now();
        let mut consumed = ConsumedChallenges::new(8, Duration::seconds(30));
        consumed.record("abcd", now);
        consumed.reset();
        assert!(!consumed.was_consumed("abcd", now));
    }
}
