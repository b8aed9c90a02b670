//! Background link checking.
//!
//! - [`limiter`]: global and per-host admission control
//! - [`probe`]: the HTTP probe executor
//! - [`service`]: the scheduling loop and its lifecycle
//! - [`stats`]: activity counters

pub mod limiter;
pub mod probe;
pub mod service;
pub mod stats;

pub use limiter::{GlobalLimiter, GlobalSlot, HostLimiter, HostSlot};
pub use probe::{HttpProber, ProbeOutcome, ProbeReport, Prober};
pub use service::{
    Checker, CheckerConfig, CheckerState, PassSummary, ShutdownReport, DEFAULT_CHECK_INTERVAL,
    DEFAULT_HOST_IDLE_TTL, DEFAULT_LIST_BATCH_SIZE, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_PER_HOST_CONCURRENCY,
};
pub use stats::{CheckerStats, CheckerStatsSnapshot};
