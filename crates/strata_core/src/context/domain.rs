//! Per-context execution domains.
//!
//! # Responsibility
//! - Confine all state access of one context to one dedicated worker thread.
//! - Provide blocking and fire-and-forget job submission.
//!
//! # Invariants
//! - Jobs submitted to the same domain run in FIFO order, never interleaved.
//! - A sync job submitted from the domain's own thread runs inline, so
//!   nested sync hops on the same domain cannot deadlock.

use crate::store::{StoreError, StoreResult};
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct ExecutionDomain {
    label: String,
    sender: Option<Sender<Job>>,
    thread_id: ThreadId,
    worker: Option<JoinHandle<()>>,
}

impl ExecutionDomain {
    /// Spawns the worker thread and waits until it reports ready.
    pub fn spawn(label: impl Into<String>) -> StoreResult<Self> {
        let label = label.into();
        let (sender, receiver) = channel::<Job>();
        let (ready_sender, ready_receiver) = channel::<ThreadId>();

        let worker = thread::Builder::new()
            .name(format!("strata-{label}"))
            .spawn(move || {
                let _ = ready_sender.send(thread::current().id());
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .map_err(|err| {
                StoreError::Domain(format!("failed to spawn domain `{label}`: {err}"))
            })?;

        let thread_id = ready_receiver
            .recv()
            .map_err(|_| StoreError::Domain(format!("domain `{label}` exited during startup")))?;

        Ok(Self {
            label,
            sender: Some(sender),
            thread_id,
            worker: Some(worker),
        })
    }

    /// True when the caller is already on this domain's thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `job` on the domain and blocks until it completes.
    ///
    /// Re-entrant: when called from the domain's own thread the job runs
    /// inline instead of being queued behind itself.
    pub fn run_sync<T, F>(&self, job: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (sender, receiver) = channel();
        self.submit(Box::new(move || {
            let _ = sender.send(job());
        }))?;
        receiver.recv().map_err(|_| {
            StoreError::Domain(format!("domain `{}` dropped a blocking job", self.label))
        })
    }

    /// Enqueues `job` and returns immediately.
    pub fn run_async<F>(&self, job: F) -> StoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(job))
    }

    fn submit(&self, job: Job) -> StoreResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StoreError::Domain(format!("domain `{}` is closed", self.label)))?;
        sender
            .send(job)
            .map_err(|_| StoreError::Domain(format!("domain `{}` is closed", self.label)))
    }
}

impl Drop for ExecutionDomain {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after queued jobs drain.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // A domain can be dropped from inside its own last job; joining
            // ourselves would deadlock, so the worker detaches in that case.
            if thread::current().id() != self.thread_id {
                let _ = worker.join();
            }
        }
    }
}
