//! Database models for linkwatch.
//!
//! These models map directly to the database schema. Timestamps are Unix
//! epoch milliseconds.

pub mod check_result;
pub mod target;

pub use check_result::*;
pub use target::*;
