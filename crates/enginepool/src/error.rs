//! Error taxonomy surfaced by the pool and dispatcher.

use std::time::Duration;

/// Errors raised by [`Pool`](crate::Pool) operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The factory failed to spawn a new worker.
    ///
    /// Fatal to the borrow that triggered the creation; no worker was
    /// registered, so pool bookkeeping is untouched.
    #[error("worker creation failed: {0}")]
    CreateFailed(anyhow::Error),

    /// No idle worker and no free capacity within the borrow timeout.
    ///
    /// Recoverable: the caller may retry or back off.
    #[error("pool exhausted: no worker available after {waited:?}")]
    Exhausted {
        /// How long the borrow waited before giving up.
        waited: Duration,
    },

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Closed,

    /// Active workers did not quiesce within the shutdown timeout.
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    /// Rejected configuration.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Outcome of [`Dispatcher::run`](crate::Dispatcher::run).
///
/// Task errors pass through unchanged; the dispatcher only adds the side
/// effect of invalidating the worker they ran on.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E> {
    /// Borrowing a worker failed; no worker was allocated, nothing was
    /// released.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The task itself failed. Its worker has been invalidated.
    #[error(transparent)]
    Task(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_display_includes_wait() {
        let err = PoolError::Exhausted {
            waited: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_task_error_passes_through_display() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "engine wedged");
        let err: DispatchError<std::io::Error> = DispatchError::Task(io);
        assert_eq!(err.to_string(), "engine wedged");
    }
}
