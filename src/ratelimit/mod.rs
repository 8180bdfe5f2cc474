//! Token bucket rate limiting logic and state management.

mod bucket;
mod clock;
mod descriptor;
mod policy;
mod service;
mod store;

pub use bucket::{Bucket, Settlement};
pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::RateLimitDescriptor;
pub use policy::{PolicyRefresh, PolicyResolver, RecoveryPolicy, UniformPolicy};
pub use service::RateLimitService;
pub use store::RateLimitStore;

pub(crate) use store::check_shard_amount;
