//! NDNSD-style decentralized service discovery.
//!
//! Producers publish [`ServiceRecord`](shared::types::ServiceRecord)s into a
//! service group; consumers in the same group learn about them through a
//! dissemination protocol and fetch them by name. There is no central
//! registry: every node runs one [`session::DiscoverySession`] per group and
//! role.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod face;
pub mod registry;
pub mod session;
pub mod sync;
