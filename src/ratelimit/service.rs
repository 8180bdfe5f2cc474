//! Rate limit service trait for abstracting over store implementations.

use crate::error::Result;

use super::clock::Clock;
use super::descriptor::RateLimitDescriptor;
use super::policy::PolicyResolver;
use super::store::RateLimitStore;

/// Trait for rate limit service implementations.
///
/// Adapters (request filters, response header writers) should be written
/// against this trait rather than a concrete store.
pub trait RateLimitService: Send + Sync {
    /// Consume `amount` from the budget of `unit`.
    fn consume(&self, unit: &str, amount: i64) -> Result<RateLimitDescriptor>;

    /// Settle and report the budget of `unit`.
    fn get(&self, unit: &str) -> Result<RateLimitDescriptor>;
}

impl<P: PolicyResolver, C: Clock> RateLimitService for RateLimitStore<P, C> {
    fn consume(&self, unit: &str, amount: i64) -> Result<RateLimitDescriptor> {
        RateLimitStore::consume(self, unit, amount)
    }

    fn get(&self, unit: &str) -> Result<RateLimitDescriptor> {
        RateLimitStore::get(self, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, UniformPolicy};
    use std::sync::Arc;

    fn admit(service: &dyn RateLimitService, unit: &str, cost: i64) -> bool {
        service.consume(unit, cost).map(|d| d.is_allowed()).unwrap_or(false)
    }

    #[test]
    fn test_store_behind_trait_object() {
        let store: Arc<dyn RateLimitService> = Arc::new(RateLimitStore::new(
            UniformPolicy::new(crate::ratelimit::RecoveryPolicy::new(1, 3)),
            ManualClock::new(0),
        ));

        assert!(admit(store.as_ref(), "api-key", 1));
        assert!(admit(store.as_ref(), "api-key", 1));
        // 3 - 1 - 1 - 1 = 0 is not positive
        assert!(!admit(store.as_ref(), "api-key", 1));
        assert_eq!(store.get("api-key").unwrap().current_budget, 0);
    }
}
