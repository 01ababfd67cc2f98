//! Primary execution context
//!
//! A serial job queue owned by one thread (normally the main thread). OS
//! subscription changes, settings reads and every outbound callback run here.

use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Unit of work for the primary context
pub type Job = Box<dyn FnOnce() + Send>;

/// Dispatch failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The queue was shut down before the job could be accepted
    #[error("primary context queue is closed")]
    Closed,

    /// The queue accepted the job but was dropped before running it
    #[error("primary context dropped the job before running it")]
    Dropped,
}

/// The receiving half, driven by the owning thread
pub struct MainQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

/// Cloneable handle for submitting jobs to a [`MainQueue`]
#[derive(Clone)]
pub struct MainHandle {
    tx: mpsc::UnboundedSender<Job>,
    owner: Arc<ThreadId>,
}

impl MainQueue {
    /// Create a queue owned by the calling thread
    ///
    /// The calling thread must later drive it with [`MainQueue::run_until`].
    #[must_use]
    pub fn new() -> (Self, MainHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MainHandle {
            tx,
            owner: Arc::new(thread::current().id()),
        };
        (Self { rx }, handle)
    }

    /// Run jobs until `shutdown` completes or every handle is dropped
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => job(),
                    None => {
                        debug!("all primary context handles dropped");
                        break;
                    }
                },
                () = &mut shutdown => {
                    debug!("primary context shutdown requested");
                    break;
                }
            }
        }
    }

    /// Run a queue on a dedicated named thread
    ///
    /// The thread exits once every handle has been dropped.
    ///
    /// # Errors
    /// Returns error if the thread or its runtime cannot be started.
    pub fn spawn(name: &str) -> std::io::Result<MainHandle> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (queue, handle) = Self::new();
                if ready_tx.send(Ok(handle)).is_err() {
                    return;
                }
                runtime.block_on(queue.run_until(std::future::pending()));
            })?;

        ready_rx.recv().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                "primary context thread exited during startup",
            )
        })?
    }
}

impl MainHandle {
    /// Whether the caller is running on the primary context
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == *self.owner
    }

    /// Queue `job` without waiting for it
    ///
    /// # Errors
    /// Returns [`DispatchError::Closed`] if the queue has shut down.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        self.tx
            .send(Box::new(job))
            .map_err(|_| DispatchError::Closed)
    }

    /// Run `job` on the primary context and wait for its result
    ///
    /// Runs inline when already on the primary context. If the queue has
    /// shut down the job runs on the calling thread instead. Must not be
    /// called from inside a job that the primary context is waiting on.
    ///
    /// # Errors
    /// Returns [`DispatchError::Dropped`] if the queue discarded the job.
    pub fn run_sync<R, F>(&self, job: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        let wrapped: Job = Box::new(move || {
            let _ = reply_tx.send(job());
        });
        if let Err(mpsc::error::SendError(wrapped)) = self.tx.send(wrapped) {
            warn!("primary context closed, running job on caller thread");
            wrapped();
        }
        reply_rx.recv().map_err(|_| DispatchError::Dropped)
    }
}
