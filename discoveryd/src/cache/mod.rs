//! Per-session record caches and their digest.

pub mod hash;
pub mod store;

pub use store::ServiceCache;
