//! Checker service implementation.
//!
//! The checker owns one background loop that runs a scheduling pass per
//! tick. A pass walks every target in creation order and admits one probe
//! task per target through the global and per-host limiters. Probe tasks
//! are spawned on a [`TaskTracker`] so shutdown can wait for exactly the
//! work that was admitted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::limiter::{GlobalLimiter, GlobalSlot, HostLimiter};
use super::probe::Prober;
use super::stats::{CheckerStats, CheckerStatsSnapshot};
use crate::Result;
use crate::database::models::{Target, TargetQuery};
use crate::database::repositories::TargetRepository;

/// Default interval between scheduling passes (15 seconds).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Default cap on probes in flight across all hosts.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default cap on probes in flight per host.
pub const DEFAULT_PER_HOST_CONCURRENCY: usize = 2;

/// Default number of targets fetched per store page within a pass.
pub const DEFAULT_LIST_BATCH_SIZE: usize = 1000;

/// Default idle time after which an unused host limiter is dropped.
pub const DEFAULT_HOST_IDLE_TTL: Duration = Duration::from_secs(600);

/// Checker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Time between the starts of consecutive passes.
    pub check_interval: Duration,
    /// Global in-flight cap.
    pub max_concurrency: usize,
    /// Per-host in-flight cap.
    pub per_host_concurrency: usize,
    /// Targets per store page.
    pub list_batch_size: usize,
    /// Idle TTL for host limiter entries.
    pub host_idle_ttl: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            per_host_concurrency: DEFAULT_PER_HOST_CONCURRENCY,
            list_batch_size: DEFAULT_LIST_BATCH_SIZE,
            host_idle_ttl: DEFAULT_HOST_IDLE_TTL,
        }
    }
}

/// Lifecycle state of a [`Checker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerState {
    /// Constructed, not started.
    Idle,
    /// Ticking and admitting probes.
    Running,
    /// Cancelled, waiting for admitted probes.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

/// Outcome of a [`Checker::shutdown`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every admitted probe finished before the grace period ran out.
    pub clean: bool,
    /// Probe tasks still running when the grace period ran out.
    pub abandoned: usize,
    /// Time spent inside shutdown.
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.clean
    }
}

/// What one scheduling pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Targets read from the store.
    pub listed: usize,
    /// Probe tasks spawned.
    pub admitted: usize,
    /// A listing failure cut the pass short.
    pub aborted: bool,
    /// Shutdown cut the pass short.
    pub cancelled: bool,
}

struct Lifecycle {
    state: CheckerState,
    loop_handle: Option<JoinHandle<()>>,
    report: Option<ShutdownReport>,
}

/// State shared between the checker handle, its loop and its probe tasks.
struct CheckerInner {
    config: CheckerConfig,
    repository: Arc<dyn TargetRepository>,
    prober: Arc<dyn Prober>,
    global: GlobalLimiter,
    hosts: HostLimiter,
    /// Stops ticks and admission.
    cancellation_token: CancellationToken,
    /// Fired when the grace period runs out; late probes drop their result.
    abandon_token: CancellationToken,
    tracker: TaskTracker,
    stats: CheckerStats,
}

/// Periodic link checker.
pub struct Checker {
    inner: Arc<CheckerInner>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes concurrent `shutdown` callers.
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl Checker {
    /// Create a checker. Fails if a concurrency cap or the batch size is zero.
    pub fn new(
        config: CheckerConfig,
        repository: Arc<dyn TargetRepository>,
        prober: Arc<dyn Prober>,
    ) -> Result<Self> {
        if config.check_interval.is_zero() {
            return Err(crate::Error::validation("check interval must be positive"));
        }
        if config.list_batch_size == 0 {
            return Err(crate::Error::validation("list batch size must be positive"));
        }

        let global = GlobalLimiter::new(config.max_concurrency)?;
        let hosts = HostLimiter::new(config.per_host_concurrency, config.host_idle_ttl)?;

        Ok(Self {
            inner: Arc::new(CheckerInner {
                config,
                repository,
                prober,
                global,
                hosts,
                cancellation_token: CancellationToken::new(),
                abandon_token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                stats: CheckerStats::new(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: CheckerState::Idle,
                loop_handle: None,
                report: None,
            }),
            shutdown_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Start the background loop. Calling it again, or after shutdown, does
    /// nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            CheckerState::Idle => {}
            CheckerState::Running => {
                debug!("Checker already running");
                return;
            }
            state => {
                warn!(?state, "Checker cannot be restarted after shutdown");
                return;
            }
        }

        info!(
            interval = ?self.inner.config.check_interval,
            max_concurrency = self.inner.global.capacity(),
            per_host_concurrency = self.inner.config.per_host_concurrency,
            "Starting checker"
        );

        let inner = self.inner.clone();
        lifecycle.loop_handle = Some(tokio::spawn(async move { inner.run_loop().await }));
        lifecycle.state = CheckerState::Running;
    }

    /// Stop ticking and admitting, then wait up to `grace` for admitted
    /// probes.
    ///
    /// Idempotent: later calls return the first call's report. Probes still
    /// running when `grace` elapses are left to finish on their own but
    /// never write a result.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let _serial = self.shutdown_lock.lock().await;

        let loop_handle = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(report) = lifecycle.report {
                return report;
            }
            lifecycle.state = CheckerState::ShuttingDown;
            lifecycle.loop_handle.take()
        };

        info!(grace = ?grace, in_flight = self.inner.tracker.len(), "Shutting down checker");
        let started = Instant::now();
        let deadline = started + grace;

        self.inner.cancellation_token.cancel();

        let inner = &self.inner;
        let mut loop_handle = loop_handle;
        let drained = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            _ = async {
                if let Some(handle) = loop_handle.as_mut() {
                    if let Err(e) = handle.await {
                        error!("Checker loop ended abnormally: {}", e);
                    }
                }
                // Nothing can be admitted once the loop is gone.
                inner.tracker.close();
                inner.tracker.wait().await;
            } => true,
        };

        let abandoned = if drained {
            0
        } else {
            self.inner.abandon_token.cancel();
            if let Some(handle) = loop_handle.as_ref() {
                handle.abort();
            }
            self.inner.tracker.close();
            self.inner.tracker.len()
        };

        let report = ShutdownReport {
            clean: drained,
            abandoned,
            elapsed: started.elapsed(),
        };

        if report.clean {
            info!(elapsed = ?report.elapsed, "Checker shut down gracefully");
        } else {
            warn!(
                abandoned = report.abandoned,
                elapsed = ?report.elapsed,
                "Checker shutdown timed out, abandoning in-flight probes"
            );
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = CheckerState::Stopped;
        lifecycle.report = Some(report);
        report
    }

    /// Run a single scheduling pass now, outside the tick loop.
    ///
    /// Probe tasks it admits are tracked like any other and are waited for by
    /// [`Checker::shutdown`].
    pub async fn run_pass(&self) -> PassSummary {
        self.inner.run_pass().await
    }

    pub fn state(&self) -> CheckerState {
        self.lifecycle.lock().state
    }

    pub fn stats(&self) -> CheckerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Probe tasks admitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl Drop for Checker {
    fn drop(&mut self) {
        // A checker dropped without shutdown must not keep ticking.
        self.inner.cancellation_token.cancel();
    }
}

impl CheckerInner {
    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let summary = self.run_pass().await;
            if summary.cancelled {
                break;
            }
        }

        debug!("Checker loop exited");
    }

    /// Admit one probe per target, page by page. Returns once every target
    /// was admitted, or on the first listing failure, or on cancellation.
    async fn run_pass(self: &Arc<Self>) -> PassSummary {
        let mut summary = PassSummary::default();
        if self.cancellation_token.is_cancelled() {
            summary.cancelled = true;
            return summary;
        }

        self.stats.record_pass();
        self.hosts.evict_idle();

        let mut after = None;
        loop {
            let query = TargetQuery::new(self.config.list_batch_size).after(after.take());
            let page = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    summary.cancelled = true;
                    return summary;
                }
                page = self.repository.list_targets(&query) => page,
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(admitted = summary.admitted, "Failed to list targets, skipping rest of pass: {}", e);
                    self.stats.record_aborted_pass();
                    summary.aborted = true;
                    return summary;
                }
            };

            summary.listed += page.items.len();
            for target in page.items {
                // Blocks while the global limiter is saturated.
                let Some(global_slot) = self.global.acquire(&self.cancellation_token).await else {
                    self.stats.record_admission_cancelled();
                    summary.cancelled = true;
                    debug!(
                        admitted = summary.admitted,
                        "Pass cancelled while waiting for a global slot"
                    );
                    return summary;
                };
                self.spawn_probe(target, global_slot);
                summary.admitted += 1;
            }

            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        debug!(
            listed = summary.listed,
            admitted = summary.admitted,
            "Scheduling pass complete"
        );
        summary
    }

    fn spawn_probe(self: &Arc<Self>, target: Target, global_slot: GlobalSlot) {
        let inner = self.clone();
        self.tracker.spawn(async move {
            inner.probe_target(target, global_slot).await;
        });
    }

    async fn probe_target(&self, target: Target, global_slot: GlobalSlot) {
        let Some(host_slot) = self
            .hosts
            .acquire(&target.host, &self.cancellation_token)
            .await
        else {
            self.stats.record_admission_cancelled();
            debug!(target_id = %target.id, host = %target.host, "Cancelled while waiting for a host slot");
            return;
        };

        self.stats.record_probe_started();
        let report = self.prober.probe(&target.url).await;

        if self.abandon_token.is_cancelled() {
            debug!(target_id = %target.id, "Shutdown deadline passed, discarding result");
            return;
        }

        let result = report.into_result(&target.id);
        match self.repository.insert_check_result(&result).await {
            Ok(saved) => {
                self.stats.record_result_written();
                debug!(
                    target_id = %target.id,
                    result_id = saved.id,
                    status = ?saved.status_code,
                    latency_ms = saved.latency_ms,
                    "Recorded check result"
                );
            }
            Err(e) => {
                self.stats.record_write_failure();
                warn!(target_id = %target.id, url = %target.url, "Failed to save check result: {}", e);
            }
        }

        // Reverse acquisition order.
        drop(host_slot);
        drop(global_slot);
    }
}
