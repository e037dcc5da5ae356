//! In-memory factory implementation for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::factory::WorkerFactory;

/// Worker produced by [`MockFactory`]: no backing process, just a
/// creation sequence number.
#[derive(Debug)]
pub struct MockWorker {
    /// Creation sequence number, unique per factory.
    pub seq: usize,
}

#[derive(Default)]
struct MockState {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    fail_creates: AtomicBool,
    healthy: AtomicBool,
    unhealthy_workers: Mutex<HashSet<usize>>,
}

/// In-memory implementation of [`WorkerFactory`].
///
/// This is primarily for testing: creation is instant, destruction only
/// counts, and health can be toggled from the outside. Clones share the
/// same counters.
///
/// # Example
///
/// ```
/// use enginepool::testing::MockFactory;
///
/// let factory = MockFactory::new();
/// assert_eq!(factory.created(), 0);
/// ```
#[derive(Clone)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a new mock factory with healthy workers.
    pub fn new() -> Self {
        let state = MockState {
            healthy: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Number of workers created so far.
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Number of workers destroyed so far.
    pub fn destroyed(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// Make subsequent `create` calls fail (or succeed again).
    pub fn set_fail_creates(&self, fail: bool) {
        self.state.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent health checks report this value.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Override the health of one worker by its sequence number.
    pub fn set_worker_healthy(&self, seq: usize, healthy: bool) {
        let mut unhealthy = self.state.unhealthy_workers.lock();
        if healthy {
            unhealthy.remove(&seq);
        } else {
            unhealthy.insert(seq);
        }
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerFactory for MockFactory {
    type Worker = MockWorker;

    async fn create(&self) -> anyhow::Result<MockWorker> {
        if self.state.fail_creates.load(Ordering::SeqCst) {
            anyhow::bail!("mock worker creation failure");
        }
        let seq = self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockWorker { seq })
    }

    async fn destroy(&self, _worker: MockWorker) {
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn health_check(&self, worker: &mut MockWorker) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
            && !self.state.unhealthy_workers.lock().contains(&worker.seq)
    }
}
