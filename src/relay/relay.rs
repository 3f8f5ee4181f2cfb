use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{self, Clock, SystemClock};
use crate::config::{ConfigError, RelayConfig};
use crate::delivery::{BoundedChannel, DeliveryChannel};
use crate::error::RelayResult;
use crate::lock::{FleetLock, HoldBounds, LockHandle};
use crate::outbox::{OutboxId, OutboxRecord, OutboxStore, OutboxTransaction};

pub const DEFAULT_JOB_NAME: &str = "outbox-relay";

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run of this relay instance is still in progress.
    AlreadyRunning,
    /// Another fleet member holds the lock.
    LockHeld,
}

/// Counts from a run that found pending records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Records the broker accepted.
    pub published: usize,
    /// Records whose publish failed; they stay `Pending`.
    pub failed: usize,
    /// Records flipped to `Sent` by the closing transaction.
    pub marked_sent: usize,
    /// Records not attempted because the lock's maximum hold was running
    /// out; they stay `Pending` for the next holder.
    pub deferred: usize,
}

/// Outcome of one `OutboxRelay::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReport {
    Skipped(SkipReason),
    /// Lock taken, nothing pending. No transaction was opened.
    Idle,
    Completed(RunStats),
}

impl RunReport {
    pub fn stats(&self) -> Option<RunStats> {
        match self {
            RunReport::Completed(stats) => Some(*stats),
            _ => None,
        }
    }
}

/// Moves `Pending` outbox records to the broker.
///
/// Each run:
/// 1. takes the fleet lock for `job_name` (or skips quietly),
/// 2. loads every `Pending` record,
/// 3. publishes them one at a time; a failure is logged and the loop moves on,
///    and the loop stops early once another publish could outlast the lock,
/// 4. flips the accepted ones to `Sent` in a single transaction,
/// 5. releases the lock.
///
/// Delivery is at least once: a crash between publish and commit means the
/// record is published again next time.
pub struct OutboxRelay<S, L, C> {
    store: S,
    lock: L,
    channel: BoundedChannel<C>,
    job_name: String,
    bounds: HoldBounds,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl<S, L, C> OutboxRelay<S, L, C>
where
    S: OutboxStore,
    L: FleetLock,
    C: DeliveryChannel + 'static,
{
    /// Create a relay with default job name, hold bounds (5s / 1m) and
    /// publish timeout (5s).
    pub fn new(store: S, lock: L, channel: C) -> Self {
        Self {
            store,
            lock,
            channel: BoundedChannel::new(channel, Duration::from_secs(5)),
            job_name: DEFAULT_JOB_NAME.to_string(),
            bounds: HoldBounds::default(),
            clock: Arc::new(SystemClock),
            running: AtomicBool::new(false),
        }
    }

    /// Create a relay from configuration. Invalid configuration is refused.
    pub fn from_config(
        store: S,
        lock: L,
        channel: C,
        config: &RelayConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(store, lock, channel)
            .with_job_name(config.job_name.clone())
            .with_hold_bounds(config.hold_bounds()?)
            .with_publish_timeout(config.publish_timeout))
    }

    /// Set the lock key shared by every fleet member running this job.
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    pub fn with_hold_bounds(mut self, bounds: HoldBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Time source for the lock deadline. Use the same clock as the lock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the deadline for a single broker call.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.channel = BoundedChannel::from_arc(self.channel.inner_arc(), timeout);
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn hold_bounds(&self) -> HoldBounds {
        self.bounds
    }

    pub fn publish_timeout(&self) -> Duration {
        self.channel.timeout()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn channel(&self) -> &C {
        self.channel.inner()
    }

    /// Run once.
    ///
    /// Returns an error only when the store or the lock backend fails; the
    /// records involved stay `Pending` and the next run picks them up.
    pub fn run(&self) -> RelayResult<RunReport> {
        let Some(_running) = RunningGuard::enter(&self.running) else {
            debug!(job = %self.job_name, "previous run still in progress, skipping");
            return Ok(RunReport::Skipped(SkipReason::AlreadyRunning));
        };

        let Some(handle) = self.lock.acquire(&self.job_name, self.bounds)? else {
            debug!(job = %self.job_name, "fleet lock held elsewhere, skipping");
            return Ok(RunReport::Skipped(SkipReason::LockHeld));
        };

        let outcome = self.relay_pending(&handle);

        if let Err(err) = self.lock.release(handle) {
            // The lock expires on its own after the maximum hold.
            error!(job = %self.job_name, error = %err, "failed to release fleet lock");
        }

        outcome
    }

    fn relay_pending(&self, handle: &LockHandle) -> RelayResult<RunReport> {
        let pending = self.store.load_pending().inspect_err(|err| {
            error!(job = %self.job_name, error = %err, "failed to load pending outbox records");
        })?;

        if pending.is_empty() {
            debug!(job = %self.job_name, "no pending outbox records");
            return Ok(RunReport::Idle);
        }

        let mut delivered: Vec<OutboxId> = Vec::with_capacity(pending.len());
        let mut failed = 0;
        let mut deferred = 0;
        for (attempted, record) in pending.iter().enumerate() {
            if !self.can_publish_within(handle) {
                deferred = pending.len() - attempted;
                warn!(
                    job = %self.job_name,
                    deferred,
                    expires_at = %handle.expires_at(),
                    "fleet lock about to expire, leaving the remaining records for the next run"
                );
                break;
            }
            if self.deliver(record) {
                delivered.push(record.id);
            } else {
                failed += 1;
            }
        }

        let marked_sent = if delivered.is_empty() {
            0
        } else {
            self.commit_sent(&delivered).inspect_err(|err| {
                error!(
                    job = %self.job_name,
                    records = delivered.len(),
                    error = %err,
                    "failed to mark published records as sent, they will be published again"
                );
            })?
        };

        let stats = RunStats {
            published: delivered.len(),
            failed,
            marked_sent,
            deferred,
        };
        info!(
            job = %self.job_name,
            published = stats.published,
            failed = stats.failed,
            marked_sent = stats.marked_sent,
            deferred = stats.deferred,
            "outbox relay run finished"
        );
        Ok(RunReport::Completed(stats))
    }

    /// A publish may take up to the publish timeout; it has to end before
    /// the lock can be taken by another member.
    fn can_publish_within(&self, handle: &LockHandle) -> bool {
        clock::shift(self.clock.now(), self.channel.timeout()) < handle.expires_at()
    }

    fn deliver(&self, record: &OutboxRecord) -> bool {
        match self
            .channel
            .publish(&record.destination, &record.routing_key, &record.payload)
        {
            Ok(()) => {
                debug!(
                    record_id = %record.id,
                    destination = %record.destination,
                    routing_key = %record.routing_key,
                    "outbox record published"
                );
                true
            }
            Err(err) => {
                warn!(
                    record_id = %record.id,
                    destination = %record.destination,
                    routing_key = %record.routing_key,
                    error = %err,
                    "failed to publish outbox record, leaving it pending"
                );
                false
            }
        }
    }

    fn commit_sent(&self, ids: &[OutboxId]) -> RelayResult<usize> {
        let mut tx = self.store.begin()?;
        let marked = tx.mark_sent(ids)?;
        tx.commit()?;
        Ok(marked)
    }
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
