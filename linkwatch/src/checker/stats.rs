//! Counters for checker activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared by the scheduling loop and every probe task.
#[derive(Debug, Default)]
pub struct CheckerStats {
    /// Scheduling passes started.
    passes: AtomicU64,
    /// Passes cut short by a listing failure.
    aborted_passes: AtomicU64,
    /// Probe tasks that got both slots and ran a probe.
    probes_started: AtomicU64,
    results_written: AtomicU64,
    write_failures: AtomicU64,
    /// Tasks that gave up waiting for a slot because of shutdown.
    admissions_cancelled: AtomicU64,
}

impl CheckerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted_pass(&self) {
        self.aborted_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_probe_started(&self) {
        self.probes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_result_written(&self) {
        self.results_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admission_cancelled(&self) {
        self.admissions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> CheckerStatsSnapshot {
        CheckerStatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            aborted_passes: self.aborted_passes.load(Ordering::Relaxed),
            probes_started: self.probes_started.load(Ordering::Relaxed),
            results_written: self.results_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            admissions_cancelled: self.admissions_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CheckerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckerStatsSnapshot {
    pub passes: u64,
    pub aborted_passes: u64,
    pub probes_started: u64,
    pub results_written: u64,
    pub write_failures: u64,
    pub admissions_cancelled: u64,
}

impl CheckerStatsSnapshot {
    /// Probes that started but have neither written nor failed to write yet,
    /// or never will because shutdown abandoned them.
    pub fn unresolved_probes(&self) -> u64 {
        self.probes_started
            .saturating_sub(self.results_written + self.write_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CheckerStats::new();
        stats.record_pass();
        stats.record_probe_started();
        stats.record_probe_started();
        stats.record_result_written();

        let snap = stats.snapshot();
        assert_eq!(snap.passes, 1);
        assert_eq!(snap.probes_started, 2);
        assert_eq!(snap.results_written, 1);
        assert_eq!(snap.unresolved_probes(), 1);
    }
}
