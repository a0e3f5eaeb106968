use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached value together with the time it was written.
///
/// Entries are never mutated. Refreshing a key writes a new entry over the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// When this entry was written, stored as whole seconds since the UNIX epoch.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub birthday: DateTime<Utc>,
    pub value: T,
}

impl<T> CacheEntry<T> {
    pub fn new(birthday: DateTime<Utc>, value: T) -> Self {
        Self { birthday, value }
    }

    /// Age of this entry in whole seconds.
    ///
    /// Entries from the future (clock skew between processes sharing a store) have age `0`.
    pub fn age(&self, now: DateTime<Utc>) -> u64 {
        let age = now.timestamp() - self.birthday.timestamp();
        age.max(0) as u64
    }

    /// Whether this entry is still fresh at `now`.
    ///
    /// An entry is fresh while `age < max_age`; an entry exactly `max_age` old is stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) < max_age.as_secs()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_freshness_boundary() {
        let max_age = Duration::from_secs(120);
        let entry = CacheEntry::new(at(10), "data");

        assert!(entry.is_fresh(at(10), max_age));
        assert!(entry.is_fresh(at(129), max_age));
        assert!(!entry.is_fresh(at(130), max_age));
        assert!(!entry.is_fresh(at(200), max_age));
    }

    #[test]
    fn test_zero_max_age_is_always_stale() {
        let entry = CacheEntry::new(at(10), "data");
        assert!(!entry.is_fresh(at(10), Duration::ZERO));
    }

    #[test]
    fn test_future_birthday() {
        let entry = CacheEntry::new(at(100), "data");
        assert_eq!(entry.age(at(50)), 0);
        assert!(entry.is_fresh(at(50), Duration::from_secs(1)));
    }

    #[test]
    fn test_subsecond_age_is_truncated() {
        let entry = CacheEntry::new(Utc.timestamp_opt(10, 900_000_000).unwrap(), ());
        assert_eq!(entry.age(Utc.timestamp_opt(11, 100_000_000).unwrap()), 1);
    }

    #[test]
    fn test_serialized_birthday_is_epoch_seconds() {
        let entry = CacheEntry::new(at(1_400_000_000), vec!["a", "b"]);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"birthday":1400000000,"value":["a","b"]}"#);
    }
}
