//! The borrow → execute → return-or-invalidate transaction.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::DispatchError;
use crate::factory::WorkerFactory;
use crate::pool::Pool;

/// Runs caller-supplied tasks against pooled workers.
///
/// Cheap to clone; hand one to every request path at startup. The
/// dispatcher never looks inside a task or its error; it only decides
/// whether the worker goes back to the pool or gets discarded.
///
/// # Example
///
/// ```ignore
/// let version = dispatcher
///     .run(|engine| Box::pin(async move { engine.version().await }))
///     .await?;
/// ```
pub struct Dispatcher<F: WorkerFactory> {
    pool: Arc<Pool<F>>,
}

impl<F: WorkerFactory> Clone for Dispatcher<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<F: WorkerFactory> Dispatcher<F> {
    /// Create a dispatcher over a pool.
    pub fn new(pool: Arc<Pool<F>>) -> Self {
        Self { pool }
    }

    /// The pool this dispatcher draws from.
    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Borrow a worker, run `task` against it, then return the worker on
    /// success or invalidate it on failure.
    ///
    /// Every task error discards the worker, whether or not the process
    /// was involved in the failure: a failed exchange may have left it in
    /// an indeterminate state. The original error is passed through
    /// unchanged as [`DispatchError::Task`].
    ///
    /// No retries happen here; a caller that wants retry semantics issues
    /// a new `run`, which borrows a fresh or different worker.
    pub async fn run<T, E, Task>(&self, task: Task) -> Result<T, DispatchError<E>>
    where
        E: std::error::Error + Send,
        Task: for<'a> FnOnce(&'a mut F::Worker) -> BoxFuture<'a, Result<T, E>> + Send,
    {
        let mut worker = self.pool.borrow().await?;
        let result = task(&mut *worker).await;
        match result {
            Ok(value) => {
                self.pool.release(worker).await;
                Ok(value)
            }
            Err(err) => {
                debug!(worker_id = %worker.id(), "task failed; discarding its worker");
                self.pool.invalidate(worker).await;
                Err(DispatchError::Task(err))
            }
        }
    }
}
