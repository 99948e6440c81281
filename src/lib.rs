//! idbridge library crate.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! under `tests/` exercise them directly.

pub mod assertion;
pub mod breaker;
pub mod bridge;
pub mod config;
pub mod downstream;
pub mod errors;
pub mod metrics;
pub mod server;
pub mod shadow;
pub mod state;
pub mod token;
