//! Rate limit descriptor snapshots.

use serde::{Deserialize, Serialize};

/// An immutable snapshot of a bucket's parameters and remaining budget.
///
/// `current_budget` is signed: over-consumption is recorded as a deficit
/// rather than rejected, and the deficit is paid back by later refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDescriptor {
    /// Units replenished per elapsed second
    pub fill_rate: i64,
    /// Ceiling on accumulated budget
    pub max_budget: i64,
    /// Budget left after the operation that produced this snapshot
    pub current_budget: i64,
}

impl RateLimitDescriptor {
    /// Create a new descriptor.
    pub fn new(fill_rate: i64, max_budget: i64, current_budget: i64) -> Self {
        Self {
            fill_rate,
            max_budget,
            current_budget,
        }
    }

    /// Whether a caller should admit the request that produced this snapshot.
    pub fn is_allowed(&self) -> bool {
        self.current_budget > 0
    }

    /// Whether the budget is used up or in deficit.
    pub fn is_exhausted(&self) -> bool {
        !self.is_allowed()
    }

    /// Whole seconds of refill needed before the budget is positive again.
    ///
    /// Returns `None` when the bucket never refills.
    pub fn seconds_until_positive(&self) -> Option<i64> {
        if self.is_allowed() {
            return Some(0);
        }
        if self.fill_rate <= 0 {
            return None;
        }
        let deficit = 1i64.saturating_sub(self.current_budget);
        Some(deficit.saturating_add(self.fill_rate - 1) / self.fill_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_camel_case_names() {
        let descriptor = RateLimitDescriptor::new(10, 1_000_000, 999_000);
        let json = serde_json::to_value(descriptor).unwrap();

        assert_eq!(json["fillRate"], 10);
        assert_eq!(json["maxBudget"], 1_000_000);
        assert_eq!(json["currentBudget"], 999_000);
    }

    #[test]
    fn test_allowed_only_when_positive() {
        assert!(RateLimitDescriptor::new(1, 10, 1).is_allowed());
        assert!(RateLimitDescriptor::new(1, 10, 0).is_exhausted());
        assert!(RateLimitDescriptor::new(1, 10, -5).is_exhausted());
    }

    #[test]
    fn test_seconds_until_positive() {
        assert_eq!(RateLimitDescriptor::new(10, 100, 5).seconds_until_positive(), Some(0));
        // 0 -> 10 after one second
        assert_eq!(RateLimitDescriptor::new(10, 100, 0).seconds_until_positive(), Some(1));
        // -25 needs 26 units, three seconds at 10/s
        assert_eq!(RateLimitDescriptor::new(10, 100, -25).seconds_until_positive(), Some(3));
        assert_eq!(RateLimitDescriptor::new(0, 100, -1).seconds_until_positive(), None);
    }
}
