//! Bucketeer - In-process Token Bucket Rate Limiting Service
//!
//! This crate tracks a replenishing budget per limitation unit (a user, an
//! API key, a route) and settles refill and consumption atomically. Budgets
//! may go negative; deciding whether to throttle is left to the caller.

pub mod config;
pub mod error;
pub mod ratelimit;
