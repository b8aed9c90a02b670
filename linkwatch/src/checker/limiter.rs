//! Admission control for probe tasks.
//!
//! Two limiters nest: every probe takes a slot from the [`GlobalLimiter`]
//! first, then from the [`HostLimiter`] entry for its hostname. Slots are
//! RAII guards, so a probe that fails or is cancelled cannot leak one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Caps the total number of probes in flight.
#[derive(Debug, Clone)]
pub struct GlobalLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held global slot. Released on drop.
#[derive(Debug)]
pub struct GlobalSlot {
    _permit: OwnedSemaphorePermit,
}

impl GlobalLimiter {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::validation("global concurrency must be positive"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(Error::validation(format!(
                "global concurrency {capacity} exceeds {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a slot.
    ///
    /// Returns `None` if `cancel` fires first, including when it has already
    /// fired before the call.
    ///
    /// # Cancel Safety
    ///
    /// Dropping the future before it resolves takes no slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<GlobalSlot> {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => {
                permit.ok().map(|permit| GlobalSlot { _permit: permit })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[derive(Debug)]
struct HostEntry {
    semaphore: Arc<Semaphore>,
    last_used: Instant,
}

type HostMap = Arc<Mutex<HashMap<String, HostEntry>>>;

/// Per-hostname concurrency caps, created lazily on first use.
///
/// Entries that sit unused for longer than the idle TTL are dropped by
/// [`HostLimiter::evict_idle`] and recreated on demand.
#[derive(Debug, Clone)]
pub struct HostLimiter {
    hosts: HostMap,
    per_host: usize,
    idle_ttl: Duration,
}

/// A held slot for one host. Released on drop.
#[derive(Debug)]
pub struct HostSlot {
    permit: Option<OwnedSemaphorePermit>,
    host: String,
    hosts: HostMap,
}

impl HostSlot {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        // Return the permit before stamping, so an evictor that runs right
        // after sees the entry as fully idle.
        drop(self.permit.take());
        if let Some(entry) = self.hosts.lock().get_mut(&self.host) {
            entry.last_used = Instant::now();
        }
    }
}

impl HostLimiter {
    pub fn new(per_host: usize, idle_ttl: Duration) -> Result<Self> {
        if per_host == 0 {
            return Err(Error::validation("per-host concurrency must be positive"));
        }
        if per_host > Semaphore::MAX_PERMITS {
            return Err(Error::validation(format!(
                "per-host concurrency {per_host} exceeds {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            hosts: Arc::new(Mutex::new(HashMap::new())),
            per_host,
            idle_ttl,
        })
    }

    /// Wait for a slot on `host`.
    ///
    /// Returns `None` if `cancel` fires first.
    ///
    /// # Cancel Safety
    ///
    /// The map lock is only held while looking up the entry, never across an
    /// await. Dropping the future takes no slot.
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Option<HostSlot> {
        if cancel.is_cancelled() {
            return None;
        }

        let semaphore = {
            let mut hosts = self.hosts.lock();
            let entry = self.get_or_create_entry(&mut hosts, host);
            entry.last_used = Instant::now();
            entry.semaphore.clone()
        };

        if semaphore.available_permits() == 0 {
            trace!(host = %host, "host saturated, waiting for a slot");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok().map(|permit| HostSlot {
                permit: Some(permit),
                host: host.to_string(),
                hosts: self.hosts.clone(),
            }),
        }
    }

    /// Drop entries with no holders, no waiters, and no activity for the
    /// idle TTL. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut hosts = self.hosts.lock();
        let before = hosts.len();
        hosts.retain(|_, entry| {
            // Waiters and outstanding permits each hold a clone.
            let referenced = Arc::strong_count(&entry.semaphore) > 1;
            let busy = entry.semaphore.available_permits() < self.per_host;
            referenced || busy || now.duration_since(entry.last_used) < self.idle_ttl
        });
        let evicted = before - hosts.len();
        if evicted > 0 {
            debug!(evicted, remaining = hosts.len(), "evicted idle host limiters");
        }
        evicted
    }

    /// Number of hosts currently tracked.
    pub fn tracked_hosts(&self) -> usize {
        self.hosts.lock().len()
    }

    /// Slots not currently held for `host`. Untracked hosts report the full cap.
    pub fn available(&self, host: &str) -> usize {
        self.hosts
            .lock()
            .get(host)
            .map(|entry| entry.semaphore.available_permits())
            .unwrap_or(self.per_host)
    }

    fn get_or_create_entry<'a>(
        &self,
        hosts: &'a mut HashMap<String, HostEntry>,
        host: &str,
    ) -> &'a mut HostEntry {
        match hosts.entry(host.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                trace!(host = %host, cap = self.per_host, "creating host limiter");
                entry.insert(HostEntry {
                    semaphore: Arc::new(Semaphore::new(self.per_host)),
                    last_used: Instant::now(),
                })
            }
        }
    }
}
