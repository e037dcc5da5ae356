//! Worker factory capability trait.

use async_trait::async_trait;

/// Creates, destroys, and health-checks the workers a
/// [`Pool`](crate::Pool) manages.
///
/// A worker wraps exactly one backing external process and never outlives
/// it. The pool is the only caller of these methods; implementations do
/// not need to coordinate concurrent access to a single worker.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// Opaque engine instance lent out to tasks.
    type Worker: Send + 'static;

    /// Spawn a new backing process and wrap it in a worker.
    ///
    /// Failures are not retried; they surface to whoever requested the
    /// worker as [`PoolError::CreateFailed`](crate::PoolError::CreateFailed).
    async fn create(&self) -> anyhow::Result<Self::Worker>;

    /// Stop the backing process and release local resources.
    ///
    /// Best effort: must tolerate a process that already exited and must
    /// release local resources even when the graceful path fails.
    async fn destroy(&self, worker: Self::Worker);

    /// Lightweight liveness probe.
    ///
    /// Used by the eviction scan to decide whether an idle worker remains
    /// usable. Must not change externally observable engine state.
    async fn health_check(&self, worker: &mut Self::Worker) -> bool;
}
