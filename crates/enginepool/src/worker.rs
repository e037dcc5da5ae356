//! Lease handle for a borrowed worker.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::factory::WorkerFactory;
use crate::pool::PoolShared;

/// Exclusive lease on one pooled worker.
///
/// Handed out by [`Pool::borrow`](crate::Pool::borrow); exactly one lease
/// exists per active worker, so two in-flight transactions can never hold
/// the same worker. Give the lease back with
/// [`Pool::release`](crate::Pool::release) or retire it with
/// [`Pool::invalidate`](crate::Pool::invalidate).
///
/// Dropping a lease without doing either is a bug in the caller: the pool
/// repairs its bookkeeping (the worker is forgotten and capacity freed)
/// and logs a warning, but stopping the backing process is left to the
/// worker's own `Drop`.
pub struct PooledWorker<F: WorkerFactory> {
    id: Uuid,
    inner: Option<F::Worker>,
    pool: Arc<PoolShared<F>>,
}

impl<F: WorkerFactory> PooledWorker<F> {
    pub(crate) fn new(id: Uuid, worker: F::Worker, pool: Arc<PoolShared<F>>) -> Self {
        Self {
            id,
            inner: Some(worker),
            pool,
        }
    }

    /// Pool-assigned identity of this worker.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consume the lease without running its drop bookkeeping.
    pub(crate) fn take(mut self) -> (Uuid, F::Worker) {
        let worker = self.inner.take().expect("lease already consumed");
        (self.id, worker)
    }
}

// Manual impl: `F::Worker` carries no `Debug` bound, so only the lease
// identity is printed.
impl<F: WorkerFactory> fmt::Debug for PooledWorker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledWorker")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<F: WorkerFactory> Deref for PooledWorker<F> {
    type Target = F::Worker;

    fn deref(&self) -> &F::Worker {
        self.inner.as_ref().expect("lease already consumed")
    }
}

impl<F: WorkerFactory> DerefMut for PooledWorker<F> {
    fn deref_mut(&mut self) -> &mut F::Worker {
        self.inner.as_mut().expect("lease already consumed")
    }
}

impl<F: WorkerFactory> Drop for PooledWorker<F> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(worker_id = %self.id, "worker lease dropped without release; discarding worker");
            self.pool.forget_active(self.id);
        }
    }
}
