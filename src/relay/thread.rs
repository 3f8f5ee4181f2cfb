//! Fixed-delay ticker for the relay.
//!
//! One background thread calls `OutboxRelay::run`, waits `fixed_delay`
//! after the run returns, and repeats. Runs therefore never overlap within
//! the process; the fleet lock takes care of other processes.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use super::{OutboxRelay, RunReport};
use crate::delivery::DeliveryChannel;
use crate::lock::FleetLock;
use crate::outbox::OutboxStore;

/// Statistics from the relay thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// Runs started, including skipped ones.
    pub ticks: usize,
    /// Runs that did nothing because the lock was held elsewhere.
    pub skipped: usize,
    pub records_published: usize,
    pub records_failed: usize,
    /// Runs aborted by a store or lock backend error.
    pub errors: usize,
}

/// A background thread that runs the relay on a fixed delay.
///
/// ## Example
///
/// ```ignore
/// let relay = Arc::new(OutboxRelay::new(store, lock, broker));
/// let ticker = RelayThread::spawn(relay, Duration::from_secs(10));
///
/// // ... serve traffic ...
///
/// let stats = ticker.stop();
/// println!("published {} records", stats.records_published);
/// ```
pub struct RelayThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl RelayThread {
    /// Spawn the ticker. The first run starts immediately.
    pub fn spawn<S, L, C>(relay: Arc<OutboxRelay<S, L, C>>, fixed_delay: Duration) -> Self
    where
        S: OutboxStore + 'static,
        L: FleetLock + 'static,
        C: DeliveryChannel + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();
            info!(job = relay.job_name(), delay = ?fixed_delay, "outbox relay thread started");

            loop {
                stats.ticks += 1;

                match relay.run() {
                    Ok(RunReport::Completed(run)) => {
                        stats.records_published += run.published;
                        stats.records_failed += run.failed;
                    }
                    Ok(RunReport::Skipped(_)) => stats.skipped += 1,
                    Ok(RunReport::Idle) => {}
                    Err(err) => {
                        stats.errors += 1;
                        error!(job = relay.job_name(), error = %err, "outbox relay run failed, retrying next tick");
                    }
                }

                match stop_rx.recv_timeout(fixed_delay) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(job = relay.job_name(), ticks = stats.ticks, "outbox relay thread stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for the current run to finish.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            RelayStats::default()
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for RelayThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
