//! Repository layer for database access.
//!
//! The checker only talks to the store through [`TargetRepository`], so tests
//! can swap the sqlx implementation for an in-memory one.

pub mod target;

pub use target::*;
