//! Request owners: the cancellation, priority and wait context of a request
//!
//! Every asynchronous cache operation is attached to one [`RequestOwner`].
//! The owner counts the work launched on its behalf and the barriers held
//! against it; [`RequestOwner::wait`] returns once both reach zero.
//!
//! Work launched on a [`Priority::Blocking`] owner runs on the launching
//! thread. Every other priority queues onto the worker pool.

use crate::pool::PoolHandle;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    /// The caller is blocked on the result; run work on the calling thread
    Blocking,
}

struct OwnerInner {
    pool: PoolHandle,
    priority: Priority,
    parent: Option<Arc<OwnerInner>>,
    canceled: AtomicBool,
    pending: Mutex<usize>,
    idle: Condvar,
}

impl OwnerInner {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|p| p.is_canceled())
    }

    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn end(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn poll(&self) -> bool {
        *self.pending.lock() == 0
    }

    fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }
}

/// Decrements the owner's pending count when dropped, whether or not the
/// job it belongs to ever ran.
struct PendingGuard(Arc<OwnerInner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Owner of a set of requests
///
/// Dropping an owner cancels it and waits for its outstanding work, unless
/// it was detached with [`RequestOwner::keep_alive`].
pub struct RequestOwner {
    inner: Arc<OwnerInner>,
    detached: bool,
}

impl RequestOwner {
    pub fn new(pool: PoolHandle, priority: Priority) -> Self {
        Self::with_parent(pool, priority, None)
    }

    fn with_parent(pool: PoolHandle, priority: Priority, parent: Option<Arc<OwnerInner>>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                pool,
                priority,
                parent,
                canceled: AtomicBool::new(false),
                pending: Mutex::new(0),
                idle: Condvar::new(),
            }),
            detached: false,
        }
    }

    /// An owner that is canceled whenever this one is
    pub fn new_child(&self, priority: Priority) -> Self {
        self.handle().new_child(priority)
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    /// True once no work or barrier is outstanding
    pub fn poll(&self) -> bool {
        self.inner.poll()
    }

    /// Block until no work or barrier is outstanding
    pub fn wait(&self) {
        self.inner.wait();
    }

    /// Flag the owner as canceled without waiting
    pub fn request_cancel(&self) {
        if !self.inner.canceled.swap(true, Ordering::AcqRel) {
            tracing::debug!(priority = ?self.inner.priority, "request owner canceled");
        }
    }

    /// Cancel and wait for outstanding work to finish
    pub fn cancel(&self) {
        self.request_cancel();
        self.wait();
    }

    pub fn handle(&self) -> OwnerHandle {
        OwnerHandle {
            inner: self.inner.clone(),
        }
    }

    /// Keep `wait` from returning while the barrier is held
    pub fn barrier(&self) -> RequestBarrier {
        self.handle().barrier()
    }

    pub fn launch_task(&self, name: &'static str, task: impl FnOnce() + Send + 'static) {
        self.handle().launch_task(name, task);
    }

    /// Release the owner without canceling it
    ///
    /// Outstanding work keeps the owner's state alive until it completes.
    pub fn keep_alive(mut self) {
        self.detached = true;
    }
}

impl Drop for RequestOwner {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel();
        }
    }
}

impl fmt::Debug for RequestOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOwner")
            .field("priority", &self.inner.priority)
            .field("canceled", &self.is_canceled())
            .field("pending", &*self.inner.pending.lock())
            .finish()
    }
}

/// Cloneable reference to an owner, carried into launched work
#[derive(Clone)]
pub struct OwnerHandle {
    inner: Arc<OwnerInner>,
}

impl OwnerHandle {
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    /// An owner that is canceled whenever this one is
    pub fn new_child(&self, priority: Priority) -> RequestOwner {
        RequestOwner::with_parent(
            self.inner.pool.clone(),
            priority,
            Some(self.inner.clone()),
        )
    }

    pub fn barrier(&self) -> RequestBarrier {
        self.inner.begin();
        RequestBarrier {
            _guard: PendingGuard(self.inner.clone()),
        }
    }

    /// Run `task` on behalf of the owner
    pub fn launch_task(&self, name: &'static str, task: impl FnOnce() + Send + 'static) {
        self.inner.begin();
        let guard = PendingGuard(self.inner.clone());
        if self.inner.priority == Priority::Blocking {
            let _span = tracing::trace_span!("ddc_task", name).entered();
            task();
            drop(guard);
            return;
        }
        self.inner.pool.execute(move || {
            let _guard = guard;
            let _span = tracing::trace_span!("ddc_task", name).entered();
            task();
        });
    }
}

/// Holds an owner's wait open until dropped
pub struct RequestBarrier {
    _guard: PendingGuard,
}
