//! Fixed-size I/O worker pool

use crossbeam::channel::{self, Receiver, Sender};
use ddc_core::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Number of I/O workers to spawn when the configuration does not say
pub fn io_worker_threads_hint() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 16)
}

/// Handle used to submit work to a [`WorkerPool`]
///
/// Handles stay valid after the pool is dropped; work submitted to a pool
/// that has shut down runs on the submitting thread.
#[derive(Clone)]
pub struct PoolHandle {
    sender: Sender<Message>,
}

impl PoolHandle {
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(channel::SendError(message)) = self.sender.send(Message::Run(Box::new(job))) {
            if let Message::Run(job) = message {
                tracing::warn!("worker pool is shut down, running job inline");
                job();
            }
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("queued", &self.sender.len())
            .finish()
    }
}

/// Worker threads draining a shared unbounded queue
pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Message>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("ddc-io-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| Error::configuration(format!("failed to spawn ddc-io-{index}: {e}")))?;
            workers.push(worker);
        }

        tracing::info!(threads, "started derived data cache worker pool");
        Ok(Self {
            handle: PoolHandle { sender },
            workers,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    while let Ok(Message::Run(job)) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(
                thread = thread::current().name().unwrap_or("ddc-io"),
                "cache job panicked"
            );
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Queued jobs run before the stop messages are seen.
        for _ in &self.workers {
            let _ = self.handle.sender.send(Message::Stop);
        }
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        tracing::info!("stopped derived data cache worker pool");
    }
}
