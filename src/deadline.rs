// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Absolute expiry deadlines and the TTL predicates the key-value merger
//! relies on.

use std::time::{SystemTime, UNIX_EPOCH};

/// An absolute expiry moment, expressed as milliseconds since the Unix
/// epoch. `None` means the entry is immortal.
pub type Deadline = Option<u64>;

/// Milliseconds since the epoch, used as "now" by merge operations that
/// don't receive an explicit clock.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `true` iff `deadline` is in the past relative to `now`.
#[must_use]
pub fn is_expired(deadline: Deadline, now: u64) -> bool {
    deadline.is_some_and(|d| d <= now)
}

/// `min(a, b)` over optional deadlines: the sooner present one, or `None`
/// if both are absent.
#[must_use]
pub fn min_deadline(a: Deadline, b: Deadline) -> Deadline {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// A predicate injected into merges: `has_time_left_at_least(d, now)` holds
/// when `d` still has at least `d - now` of life left, i.e. `d` has not yet
/// elapsed relative to `now`. Exposed as a plain function pointer type so
/// callers can supply a deterministic clock in tests.
pub type HasTimeLeftAtLeast = fn(Deadline, u64) -> bool;

/// The default `has_time_left_at_least`: simply "not yet expired".
#[must_use]
pub fn default_has_time_left_at_least(deadline: Deadline, now: u64) -> bool {
    !is_expired(deadline, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_checks_past_only() {
        assert!(is_expired(Some(100), 200));
        assert!(is_expired(Some(100), 100));
        assert!(!is_expired(Some(100), 50));
        assert!(!is_expired(None, 50));
    }

    #[test]
    fn min_deadline_prefers_sooner_present() {
        assert_eq!(min_deadline(Some(10), Some(5)), Some(5));
        assert_eq!(min_deadline(Some(10), None), Some(10));
        assert_eq!(min_deadline(None, None), None);
    }
}
