//! Timeout enforcement for broker calls.
//!
//! A blocking client call cannot be interrupted from outside, so
//! `BoundedChannel` runs calls on a dedicated delivery thread and waits for
//! the answer with a deadline. When the deadline passes the call is reported
//! as `PublishError::Timeout`, the thread is abandoned (it exits once the stuck
//! call returns) and the next call starts a fresh one.
//!
//! Abandoned threads still hold a stack and whatever the stuck call holds.
//! Once `max_stuck_calls` of them are alive, calls fail immediately with
//! `PublishError::ConnectionFailed` until one of them exits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{DeliveryChannel, PublishError};

/// Abandoned delivery threads allowed to be alive at once.
pub const DEFAULT_MAX_STUCK_CALLS: usize = 4;

enum Call {
    Publish {
        destination: String,
        routing_key: String,
        payload: String,
    },
    Exists {
        destination: String,
    },
}

enum Reply {
    Published(Result<(), PublishError>),
    Exists(Result<bool, PublishError>),
}

struct Job {
    call: Call,
    reply: SyncSender<Reply>,
}

/// Wraps a channel so that no call blocks longer than `timeout`.
pub struct BoundedChannel<C> {
    inner: Arc<C>,
    timeout: Duration,
    worker: Mutex<Option<Sender<Job>>>,
    abandoned: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_stuck_calls: usize,
}

/// Decrements the live-thread count when a delivery thread exits.
struct LiveThread(Arc<AtomicUsize>);

impl LiveThread {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        LiveThread(Arc::clone(count))
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<C: DeliveryChannel + 'static> BoundedChannel<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self::from_arc(Arc::new(inner), timeout)
    }

    pub fn from_arc(inner: Arc<C>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            worker: Mutex::new(None),
            abandoned: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            max_stuck_calls: DEFAULT_MAX_STUCK_CALLS,
        }
    }

    /// Cap on abandoned threads still blocked in the broker. At least one.
    pub fn with_max_stuck_calls(mut self, max: usize) -> Self {
        self.max_stuck_calls = max.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_arc(&self) -> Arc<C> {
        Arc::clone(&self.inner)
    }

    /// Delivery threads given up on because a call overran the timeout.
    pub fn abandoned_threads(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Delivery threads currently alive, the active one included.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn spawn_worker(&self) -> Result<Sender<Job>, PublishError> {
        // No active worker here, so every live thread is a stuck one.
        let stuck = self.live_threads();
        if stuck >= self.max_stuck_calls {
            warn!(stuck, "delivery threads still blocked in the broker, failing fast");
            return Err(PublishError::ConnectionFailed(format!(
                "{stuck} earlier broker calls have not returned"
            )));
        }

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let inner = Arc::clone(&self.inner);
        let live = LiveThread::enter(&self.live);

        thread::Builder::new()
            .name("outbox-delivery".into())
            .spawn(move || {
                let _live = live;
                while let Ok(job) = job_rx.recv() {
                    let reply = match job.call {
                        Call::Publish {
                            destination,
                            routing_key,
                            payload,
                        } => Reply::Published(inner.publish(&destination, &routing_key, &payload)),
                        Call::Exists { destination } => Reply::Exists(inner.exists(&destination)),
                    };
                    // The caller may have timed out and gone away.
                    let _ = job.reply.send(reply);
                }
            })
            .map_err(|e| PublishError::ConnectionFailed(format!("delivery thread: {e}")))?;

        Ok(job_tx)
    }

    fn call(&self, call: Call) -> Result<Reply, PublishError> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("delivery worker poisoned".into()))?;

        let sender = match worker.as_ref() {
            Some(sender) => sender.clone(),
            None => {
                let sender = self.spawn_worker()?;
                *worker = Some(sender.clone());
                sender
            }
        };

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if sender.send(Job { call, reply: reply_tx }).is_err() {
            *worker = None;
            return Err(PublishError::ConnectionFailed(
                "delivery thread stopped".into(),
            ));
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                *worker = None;
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                warn!(timeout = ?self.timeout, "broker call timed out, abandoning delivery thread");
                Err(PublishError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                *worker = None;
                Err(PublishError::ConnectionFailed(
                    "delivery thread stopped mid-call".into(),
                ))
            }
        }
    }
}

impl<C: DeliveryChannel + 'static> DeliveryChannel for BoundedChannel<C> {
    fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        let call = Call::Publish {
            destination: destination.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_string(),
        };
        match self.call(call)? {
            Reply::Published(result) => result,
            Reply::Exists(_) => Err(PublishError::ConnectionFailed(
                "mismatched reply from delivery thread".into(),
            )),
        }
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        let call = Call::Exists {
            destination: destination.to_string(),
        };
        match self.call(call)? {
            Reply::Exists(result) => result,
            Reply::Published(_) => Err(PublishError::ConnectionFailed(
                "mismatched reply from delivery thread".into(),
            )),
        }
    }
}
