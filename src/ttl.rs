//! TTL normalization
//!
//! Callers hand the repository either a relative duration or an absolute
//! expiry instant. Both are normalized to the time remaining before the
//! entry expires, which is what a [`Store`](crate::store::Store) understands.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Lifetime requested for a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Expire after the given duration
    For(Duration),
    /// Expire at the given instant
    Until(DateTime<Utc>),
    /// Never expire on its own
    Forever,
}

/// Normalized lifetime, relative to "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Forever,
    In(Duration),
    /// Zero or negative lifetime: the write must behave as an immediate removal
    Expired,
}

impl Ttl {
    /// TTL from a signed number of seconds; zero or negative is already expired
    pub fn seconds(seconds: i64) -> Self {
        Self::from(TimeDelta::seconds(seconds))
    }

    pub fn normalize(&self) -> Expiry {
        self.normalize_at(Utc::now())
    }

    pub fn normalize_at(&self, now: DateTime<Utc>) -> Expiry {
        match self {
            Self::Forever => Expiry::Forever,
            Self::For(duration) if duration.is_zero() => Expiry::Expired,
            Self::For(duration) => Expiry::In(*duration),
            Self::Until(at) => match (*at - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => Expiry::In(remaining),
                _ => Expiry::Expired,
            },
        }
    }
}

impl Expiry {
    /// Store-level TTL: `None` for forever, `Some(ZERO)` for already expired
    pub fn as_store_ttl(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::In(duration) => Some(*duration),
            Self::Expired => Some(Duration::ZERO),
        }
    }

    /// Whole seconds remaining, rounded up so sub-second TTLs still live one tick
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Forever => None,
            Self::In(duration) => {
                let secs = duration.as_secs();
                Some(if duration.subsec_nanos() > 0 { secs.saturating_add(1) } else { secs })
            }
            Self::Expired => Some(0),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Self::For(duration)
    }
}

impl From<TimeDelta> for Ttl {
    fn from(delta: TimeDelta) -> Self {
        // Negative deltas fail to_std and collapse to "already expired"
        Self::For(delta.to_std().unwrap_or(Duration::ZERO))
    }
}

impl From<DateTime<Utc>> for Ttl {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Until(at)
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::Forever, Self::For)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_and_negative_are_expired() {
        assert_eq!(Ttl::For(Duration::ZERO).normalize(), Expiry::Expired);
        assert_eq!(Ttl::seconds(0).normalize(), Expiry::Expired);
        assert_eq!(Ttl::seconds(-30).normalize(), Expiry::Expired);
    }

    #[test]
    fn test_absolute_instant_becomes_remaining_duration() {
        let now = Utc::now();
        let ttl = Ttl::from(now + TimeDelta::seconds(90));
        assert_eq!(ttl.normalize_at(now), Expiry::In(Duration::from_secs(90)));

        let past = Ttl::from(now - TimeDelta::seconds(1));
        assert_eq!(past.normalize_at(now), Expiry::Expired);
    }

    #[test]
    fn test_forever_has_no_store_ttl() {
        assert_eq!(Ttl::Forever.normalize().as_store_ttl(), None);
        assert_eq!(Ttl::from(None).normalize(), Expiry::Forever);
    }

    #[test]
    fn test_as_secs_rounds_up() {
        assert_eq!(Expiry::In(Duration::from_millis(1500)).as_secs(), Some(2));
        assert_eq!(Expiry::In(Duration::from_secs(3)).as_secs(), Some(3));
        assert_eq!(Expiry::Expired.as_secs(), Some(0));
        assert_eq!(Expiry::In(Duration::MAX).as_secs(), Some(u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_positive_seconds_are_live(secs in 1i64..1_000_000) {
            let expiry = Ttl::seconds(secs).normalize();
            prop_assert_eq!(expiry, Expiry::In(Duration::from_secs(secs as u64)));
        }

        #[test]
        fn prop_past_instants_are_expired(secs in 0i64..1_000_000) {
            let now = Utc::now();
            let ttl = Ttl::Until(now - TimeDelta::seconds(secs));
            prop_assert!(ttl.normalize_at(now).is_expired());
        }
    }
}
