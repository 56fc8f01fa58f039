//! Read-only HTTP inspection API.

pub mod routes;

pub use routes::{router, AppState};
