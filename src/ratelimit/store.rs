//! In-memory token bucket store.

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::config::LimiterConfig;
use crate::error::{BucketeerError, Result};

use super::bucket::Bucket;
use super::clock::{Clock, SystemClock};
use super::descriptor::RateLimitDescriptor;
use super::policy::{PolicyRefresh, PolicyResolver, RecoveryPolicy, UniformPolicy};

/// Holds one token bucket per limitation unit and performs all refill and
/// consumption under mutual exclusion.
///
/// Buckets live in a sharded map. Each `consume`/`get` holds the write lock
/// of the shard owning its unit for the whole read-modify-write, so updates
/// to one unit are linearizable while units in other shards proceed in
/// parallel. The clock is read inside that critical section. The policy
/// resolver is called before entering it under [`PolicyRefresh::OnCreate`]
/// and inside it under [`PolicyRefresh::EveryAccess`], where a slow resolver
/// holds up its whole shard and must not call back into the store.
pub struct RateLimitStore<P = UniformPolicy, C = SystemClock> {
    /// Bucket state indexed by limitation unit
    buckets: DashMap<String, Bucket>,
    /// Source of recovery policies
    resolver: P,
    /// Source of time
    clock: C,
    /// Whether stored parameters follow later policy changes
    refresh: PolicyRefresh,
}

impl<P: PolicyResolver, C: Clock> RateLimitStore<P, C> {
    /// Create an empty store.
    pub fn new(resolver: P, clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            resolver,
            clock,
            refresh: PolicyRefresh::default(),
        }
    }

    /// Create an empty store with an explicit number of lock shards.
    ///
    /// `0` uses the map's default. Anything else must be a power of two
    /// greater than 1.
    pub fn with_shard_amount(resolver: P, clock: C, shard_amount: usize) -> Result<Self> {
        check_shard_amount(shard_amount)?;
        if shard_amount == 0 {
            return Ok(Self::new(resolver, clock));
        }
        Ok(Self {
            buckets: DashMap::with_shard_amount(shard_amount),
            resolver,
            clock,
            refresh: PolicyRefresh::default(),
        })
    }

    /// Choose when buckets pick up policy changes.
    pub fn with_policy_refresh(mut self, refresh: PolicyRefresh) -> Self {
        self.refresh = refresh;
        self
    }

    /// Settle accumulated refill for `unit` and subtract `amount`.
    ///
    /// The result may be negative; admission is the caller's decision. A
    /// negative `amount` adds to the budget.
    pub fn consume(&self, unit: &str, amount: i64) -> Result<RateLimitDescriptor> {
        self.settle(unit, amount)
    }

    /// Settle accumulated refill for `unit` without consuming.
    ///
    /// This is not a pure read: the refilled budget and the access time are
    /// written back, exactly like `consume(unit, 0)`.
    pub fn get(&self, unit: &str) -> Result<RateLimitDescriptor> {
        self.settle(unit, 0)
    }

    fn settle(&self, unit: &str, amount: i64) -> Result<RateLimitDescriptor> {
        if unit.is_empty() {
            return Err(BucketeerError::InvalidUnit);
        }

        // Under EveryAccess the stored parameters must follow resolve order,
        // so resolution moves inside the shard lock.
        let resolved = match self.refresh {
            PolicyRefresh::OnCreate => Some(self.resolve(unit)?),
            PolicyRefresh::EveryAccess => None,
        };

        let settlement = {
            let entry = self.buckets.entry(unit.to_owned());
            let policy = match resolved {
                Some(policy) => policy,
                None => self.resolve(unit)?,
            };
            let now = self.clock.now();
            let mut bucket = entry.or_insert_with(|| {
                debug!(
                    unit = %unit,
                    fill_rate = policy.fill_rate,
                    max_budget = policy.max_budget,
                    "Creating new bucket"
                );
                Bucket::new(policy, now)
            });

            if self.refresh == PolicyRefresh::EveryAccess {
                bucket.apply_policy(policy);
            }
            bucket.settle(now, amount)
        };

        trace!(
            unit = %unit,
            elapsed = settlement.elapsed,
            refill = settlement.refill,
            amount = amount,
            budget = settlement.descriptor.current_budget,
            "Settled bucket"
        );

        Ok(settlement.descriptor)
    }

    fn resolve(&self, unit: &str) -> Result<RecoveryPolicy> {
        let policy = self.resolver.resolve(unit)?;
        if let Err(e) = policy.validate(unit) {
            warn!(
                unit = %unit,
                fill_rate = policy.fill_rate,
                max_budget = policy.max_budget,
                "Rejecting malformed recovery policy"
            );
            return Err(e);
        }
        Ok(policy)
    }

    /// Stored state of `unit` as of its last access, without settling.
    pub fn peek(&self, unit: &str) -> Option<Bucket> {
        self.buckets.get(unit).map(|b| b.clone())
    }

    /// Drop the bucket for `unit`. The next access recreates it fully
    /// charged.
    pub fn evict(&self, unit: &str) -> Option<Bucket> {
        let removed = self.buckets.remove(unit).map(|(_, b)| b);
        if removed.is_some() {
            debug!(unit = %unit, "Evicted bucket");
        }
        removed
    }

    /// Drop every bucket not accessed within the last `max_idle_secs`
    /// seconds. Returns how many were removed.
    pub fn evict_idle(&self, max_idle_secs: i64) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let keep = now.saturating_sub(bucket.last_update()) <= max_idle_secs;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted = evicted, max_idle_secs = max_idle_secs, "Evicted idle buckets");
        }
        evicted
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// Get the number of tracked units.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no unit has been accessed yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The policy resolver.
    pub fn resolver(&self) -> &P {
        &self.resolver
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> RateLimitStore<UniformPolicy, C> {
    /// Create a store resolving the configured default policy for every
    /// unit.
    pub fn from_config(config: &LimiterConfig, clock: C) -> Result<Self> {
        let resolver = UniformPolicy::new(config.default_policy());
        Ok(Self::with_shard_amount(resolver, clock, config.shard_amount)?
            .with_policy_refresh(config.policy_refresh))
    }
}

/// dashmap panics on anything but 0 or a power of two greater than 1.
pub(crate) fn check_shard_amount(shard_amount: usize) -> Result<()> {
    if shard_amount != 0 && (shard_amount < 2 || !shard_amount.is_power_of_two()) {
        return Err(BucketeerError::Config(format!(
            "shard_amount must be 0 or a power of two greater than 1, got {}",
            shard_amount
        )));
    }
    Ok(())
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new(UniformPolicy::default(), SystemClock)
    }
}
