//! HTTP handlers grouped by concern.

pub mod bridge;
pub mod health;
pub mod shadow;
pub mod tokens;
