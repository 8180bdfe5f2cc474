//! Recovery policies and their resolution per limitation unit.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BucketeerError, Result};

/// How fast a bucket refills and how much it can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Units replenished per elapsed second
    pub fill_rate: i64,
    /// Ceiling on accumulated budget
    pub max_budget: i64,
}

impl RecoveryPolicy {
    /// Create a new recovery policy.
    pub fn new(fill_rate: i64, max_budget: i64) -> Self {
        Self {
            fill_rate,
            max_budget,
        }
    }

    /// Reject policies that would feed negative rates or ceilings into the
    /// refill arithmetic.
    pub fn validate(&self, unit: &str) -> Result<()> {
        if self.fill_rate < 0 || self.max_budget < 0 {
            return Err(BucketeerError::InvalidPolicy {
                unit: unit.to_string(),
                fill_rate: self.fill_rate,
                max_budget: self.max_budget,
            });
        }
        Ok(())
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(10, 1_000_000)
    }
}

/// When a bucket's stored parameters follow the resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRefresh {
    /// Parameters are fixed when the bucket is created; later policy changes
    /// only reach buckets created afterwards.
    #[default]
    OnCreate,
    /// Parameters are overwritten with the resolved policy on every access,
    /// before refill is computed.
    EveryAccess,
}

/// Maps a limitation unit to its recovery policy.
///
/// Called on every `consume`/`get`. With [`PolicyRefresh::EveryAccess`] the
/// call happens while the unit's shard is locked, so it must not call back
/// into the store. It should be an in-memory lookup; nothing bounds how long
/// it may take.
pub trait PolicyResolver: Send + Sync {
    /// Resolve the policy for `unit`.
    fn resolve(&self, unit: &str) -> Result<RecoveryPolicy>;
}

impl<F> PolicyResolver for F
where
    F: Fn(&str) -> RecoveryPolicy + Send + Sync,
{
    fn resolve(&self, unit: &str) -> Result<RecoveryPolicy> {
        Ok(self(unit))
    }
}

/// Resolves the same policy for every unit. The policy can be swapped at
/// runtime.
#[derive(Debug, Default)]
pub struct UniformPolicy {
    policy: RwLock<RecoveryPolicy>,
}

impl UniformPolicy {
    /// Create a resolver handing out `policy`.
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Replace the policy handed out from now on.
    pub fn set_policy(&self, policy: RecoveryPolicy) {
        *self.policy.write() = policy;
    }

    /// The policy currently handed out.
    pub fn policy(&self) -> RecoveryPolicy {
        *self.policy.read()
    }
}

impl PolicyResolver for UniformPolicy {
    fn resolve(&self, _unit: &str) -> Result<RecoveryPolicy> {
        Ok(self.policy())
    }
}
