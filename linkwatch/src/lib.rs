//! linkwatch library crate.
//!
//! Periodically probes registered HTTP(S) targets and records one result per
//! probe. The binary wires these modules together; they are exposed here for
//! integration testing.

pub mod checker;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod utils;

pub use error::{Error, Result};
