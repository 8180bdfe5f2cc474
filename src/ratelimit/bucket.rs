//! Token bucket state and refill arithmetic.

use super::descriptor::RateLimitDescriptor;
use super::policy::RecoveryPolicy;

/// Per-unit bucket state.
///
/// The bucket itself is not synchronized; the store guarantees exclusive
/// access for the whole read-modify-write of [`Bucket::settle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    fill_rate: i64,
    max_budget: i64,
    current_budget: i64,
    last_update: i64,
}

/// What a single settle did to a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Seconds credited since the previous access
    pub elapsed: i64,
    /// Units credited for `elapsed`, before clamping
    pub refill: i64,
    /// The bucket after the settle
    pub descriptor: RateLimitDescriptor,
}

impl Bucket {
    /// Create a fully charged bucket.
    pub fn new(policy: RecoveryPolicy, now: i64) -> Self {
        Self {
            fill_rate: policy.fill_rate,
            max_budget: policy.max_budget,
            current_budget: policy.max_budget,
            last_update: now,
        }
    }

    /// Overwrite the recovery parameters, keeping budget and timestamp.
    pub fn apply_policy(&mut self, policy: RecoveryPolicy) {
        self.fill_rate = policy.fill_rate;
        self.max_budget = policy.max_budget;
    }

    /// Credit refill for the time since the last access, clamp it to the
    /// ceiling, then subtract `amount`.
    ///
    /// The subtraction is not clamped: the budget may go negative, and a
    /// negative `amount` may push it above `max_budget`. Arithmetic
    /// saturates instead of wrapping. A clock reading older than the last
    /// access credits nothing and leaves the timestamp where it was.
    pub fn settle(&mut self, now: i64, amount: i64) -> Settlement {
        let elapsed = now.saturating_sub(self.last_update).max(0);
        let refill = elapsed.saturating_mul(self.fill_rate);
        let budget = self
            .max_budget
            .min(self.current_budget.saturating_add(refill))
            .saturating_sub(amount);

        self.last_update = self.last_update.max(now);
        self.current_budget = budget;

        Settlement {
            elapsed,
            refill,
            descriptor: self.descriptor(),
        }
    }

    /// Snapshot of the stored state, without settling.
    pub fn descriptor(&self) -> RateLimitDescriptor {
        RateLimitDescriptor::new(self.fill_rate, self.max_budget, self.current_budget)
    }

    /// Epoch seconds of the last access.
    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    /// Budget as of the last access.
    pub fn current_budget(&self) -> i64 {
        self.current_budget
    }
}
