//! Bounded, concurrency-safe custody of workers.
//!
//! The pool partitions its workers into an idle set (owned by the pool)
//! and an active set (each owned by exactly one in-flight lease). All
//! bookkeeping mutations are serialized under one mutex that is never
//! held across an await; counts read outside it are best-effort.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::factory::WorkerFactory;
use crate::worker::PooledWorker;

/// One parked worker plus what the eviction scan needs to judge it.
struct IdleEntry<W> {
    id: Uuid,
    worker: W,
    returned_at: Instant,
}

/// Mutable bookkeeping. Invariant: `idle` and `active` are disjoint and
/// `live` counts both plus any creation slots reserved but not yet filled.
struct State<W> {
    idle: VecDeque<IdleEntry<W>>,
    active: HashSet<Uuid>,
    live: usize,
    closed: bool,
}

impl<W> State<W> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashSet::new(),
            live: 0,
            closed: false,
        }
    }
}

/// Outcome of one locked look at the pool state during `borrow`.
///
/// The lock guard must not live across an await, so the locked section
/// reduces to one of these and the caller acts on it afterwards.
enum Claim<W> {
    /// An idle worker was taken and marked active.
    Idle(IdleEntry<W>),
    /// A live slot was reserved; create a fresh worker against it.
    Slot,
    /// Pool exhausted; wait for a wakeup.
    Wait,
}

/// State shared between the pool handle, outstanding leases, and the
/// eviction task.
pub(crate) struct PoolShared<F: WorkerFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<State<F::Worker>>,
    /// Signalled once per freed unit: a worker returned to the idle set
    /// or one live slot released.
    available: Notify,
}

/// Releases a reserved creation slot unless defused.
///
/// Reserving `live` before awaiting the factory keeps the pool under
/// `max_total` while a creation is in flight; this guard undoes the
/// reservation if the creation fails or the borrowing future is dropped
/// mid-create.
struct SlotGuard<'a, F: WorkerFactory> {
    shared: &'a PoolShared<F>,
}

impl<F: WorkerFactory> Drop for SlotGuard<'_, F> {
    fn drop(&mut self) {
        self.shared.state.lock().live -= 1;
        self.shared.available.notify_one();
    }
}

impl<F: WorkerFactory> PoolShared<F> {
    /// Drop-path repair for a lease that was neither released nor
    /// invalidated.
    pub(crate) fn forget_active(&self, id: Uuid) {
        let mut state = self.state.lock();
        assert!(
            state.active.remove(&id),
            "worker {id} is not active in this pool"
        );
        state.live -= 1;
        drop(state);
        self.available.notify_one();
    }

    /// Create idle workers until `min_idle` idle exist or `max_total`
    /// live is reached. Returns how many were created.
    async fn replenish(&self) -> Result<usize, PoolError> {
        let mut created = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed
                    || state.idle.len() >= self.config.min_idle
                    || state.live >= self.config.max_total
                {
                    return Ok(created);
                }
                state.live += 1;
            }

            let guard = SlotGuard { shared: self };
            let worker = self
                .factory
                .create()
                .await
                .map_err(PoolError::CreateFailed)?;
            std::mem::forget(guard);

            let id = Uuid::now_v7();
            self.state.lock().idle.push_back(IdleEntry {
                id,
                worker,
                returned_at: Instant::now(),
            });
            self.available.notify_one();
            created += 1;
            debug!(worker_id = %id, "created idle worker");
        }
    }
}

/// Bounded pool of engine workers with a background eviction cycle.
///
/// Construct one at application startup and hand it (behind an `Arc`, or
/// wrapped in a [`Dispatcher`](crate::Dispatcher)) into every request
/// path; there is no implicit global instance.
///
/// # Example
///
/// ```ignore
/// use enginepool::{Pool, PoolConfig};
///
/// let pool = Pool::new(factory, PoolConfig::default().with_max_total(4))?;
/// let worker = pool.borrow().await?;
/// // ... run a request against the worker ...
/// pool.release(worker).await;
/// ```
pub struct Pool<F: WorkerFactory> {
    shared: Arc<PoolShared<F>>,
    shutdown_tx: watch::Sender<bool>,
    evict_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<F: WorkerFactory> Pool<F> {
    /// Create a pool and start its eviction cycle.
    ///
    /// Must be called within a Tokio runtime. Workers are not pre-created
    /// here; the first eviction tick (or an explicit
    /// [`prepare`](Self::prepare)) brings the idle set up to `min_idle`.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            factory,
            config,
            state: Mutex::new(State::new()),
            available: Notify::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(eviction_loop(Arc::clone(&shared), shutdown_rx));

        info!(
            min_idle = shared.config.min_idle,
            max_total = shared.config.max_total,
            "engine pool started"
        );

        Ok(Self {
            shared,
            shutdown_tx,
            evict_handle: Mutex::new(Some(handle)),
        })
    }

    /// Bring the idle set up to `min_idle` immediately.
    ///
    /// Creation failures propagate; the pool keeps whatever it managed to
    /// create.
    pub async fn prepare(&self) -> Result<(), PoolError> {
        self.shared.replenish().await.map(|_| ())
    }

    /// Borrow a worker, creating one if the pool is under capacity.
    ///
    /// This is the sole idle → active transition: exactly one caller ever
    /// receives a given worker. When the pool is at `max_total` with
    /// nothing idle, waits up to `borrow_timeout` for a return or freed
    /// capacity, then fails with [`PoolError::Exhausted`]. There is no
    /// fairness guarantee among waiting borrowers.
    #[instrument(skip(self), level = "debug")]
    pub async fn borrow(&self) -> Result<PooledWorker<F>, PoolError> {
        let started = Instant::now();
        let deadline = self.shared.config.borrow_timeout.map(|t| started + t);

        loop {
            // Arm the wakeup before checking state so a release between
            // the check and the await is not lost.
            let available = self.shared.available.notified();

            let claim = {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                // LIFO keeps recently used workers hot and lets the rest
                // age toward eviction.
                if let Some(entry) = state.idle.pop_back() {
                    state.active.insert(entry.id);
                    Claim::Idle(entry)
                } else if state.live < self.shared.config.max_total {
                    state.live += 1;
                    Claim::Slot
                } else {
                    Claim::Wait
                }
            };

            match claim {
                Claim::Idle(entry) => {
                    debug!(worker_id = %entry.id, "borrowed idle worker");
                    return Ok(PooledWorker::new(
                        entry.id,
                        entry.worker,
                        Arc::clone(&self.shared),
                    ));
                }
                Claim::Slot => return self.create_active().await,
                Claim::Wait => {}
            }

            match deadline {
                None => available.await,
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || tokio::time::timeout_at(deadline, available).await.is_err()
                    {
                        return Err(PoolError::Exhausted {
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    /// Create a worker against a live slot already reserved by `borrow`.
    async fn create_active(&self) -> Result<PooledWorker<F>, PoolError> {
        let guard = SlotGuard {
            shared: &self.shared,
        };
        let worker = self
            .shared
            .factory
            .create()
            .await
            .map_err(PoolError::CreateFailed)?;
        std::mem::forget(guard);

        let id = Uuid::now_v7();
        self.shared.state.lock().active.insert(id);
        debug!(worker_id = %id, "created worker");
        Ok(PooledWorker::new(id, worker, Arc::clone(&self.shared)))
    }

    /// Return a worker to the idle set and stamp its idle timestamp.
    ///
    /// Only legal for a worker borrowed from this pool; lease ownership
    /// makes double-return unrepresentable, and a foreign lease aborts.
    /// If the pool has shut down in the meantime the worker is destroyed
    /// instead of idling.
    pub async fn release(&self, lease: PooledWorker<F>) {
        let (id, worker) = lease.take();
        // The guard stays inside this block so the future holds nothing
        // non-Send across the destroy await below.
        let doomed = {
            let mut state = self.shared.state.lock();
            assert!(
                state.active.remove(&id),
                "returned worker {id} is not active in this pool"
            );
            if state.closed {
                state.live -= 1;
                Some(worker)
            } else {
                state.idle.push_back(IdleEntry {
                    id,
                    worker,
                    returned_at: Instant::now(),
                });
                None
            }
        };
        match doomed {
            Some(worker) => {
                debug!(worker_id = %id, "pool closed; destroying returned worker");
                self.shared.factory.destroy(worker).await;
            }
            None => debug!(worker_id = %id, "worker returned to idle set"),
        }
        self.shared.available.notify_one();
    }

    /// Destroy a worker and free its capacity.
    ///
    /// The only exit for a worker whose task failed: it never re-enters
    /// circulation. A replacement is created later on demand or by the
    /// eviction cycle.
    pub async fn invalidate(&self, lease: PooledWorker<F>) {
        let (id, worker) = lease.take();
        {
            let mut state = self.shared.state.lock();
            assert!(
                state.active.remove(&id),
                "invalidated worker {id} is not active in this pool"
            );
            state.live -= 1;
        }
        warn!(worker_id = %id, "invalidating worker");
        self.shared.factory.destroy(worker).await;
        self.shared.available.notify_one();
    }

    /// Live workers: idle + active + creations in flight (best-effort).
    pub fn live_count(&self) -> usize {
        self.shared.state.lock().live
    }

    /// Workers currently parked in the idle set (best-effort).
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Workers currently lent out (best-effort).
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active.len()
    }

    /// Shut the pool down.
    ///
    /// Stops the eviction cycle, destroys every idle worker, then waits
    /// up to `shutdown_timeout` for active workers to be returned; each
    /// is destroyed as it comes back. In-flight tasks are not cancelled;
    /// if they outlast the deadline this fails with
    /// [`PoolError::ShutdownTimeout`] rather than leaking silently.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        info!("shutting down engine pool");
        let _ = self.shutdown_tx.send(true);
        // Wake every blocked borrower so it observes the closed flag.
        self.shared.available.notify_waiters();

        let handle = self.evict_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Drain and destroy the idle set.
        loop {
            let entry = {
                let mut state = self.shared.state.lock();
                let entry = state.idle.pop_front();
                if entry.is_some() {
                    state.live -= 1;
                }
                entry
            };
            match entry {
                Some(entry) => {
                    debug!(worker_id = %entry.id, "destroying idle worker at shutdown");
                    self.shared.factory.destroy(entry.worker).await;
                }
                None => break,
            }
        }

        // Active workers are destroyed on return now that the pool is
        // closed; wait for them to quiesce.
        let deadline = Instant::now() + self.shared.config.shutdown_timeout;
        loop {
            if self.shared.state.lock().live == 0 {
                info!("engine pool stopped");
                return Ok(());
            }
            if Instant::now() >= deadline {
                let remaining = self.shared.state.lock().live;
                warn!(remaining, "workers still active at shutdown deadline");
                return Err(PoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl<F: WorkerFactory> Drop for Pool<F> {
    fn drop(&mut self) {
        // The eviction task must not outlive the pool handle when the
        // caller skipped an explicit shutdown.
        if let Some(handle) = self.evict_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Background eviction cycle: scan, then replenish, every
/// `eviction_interval`.
async fn eviction_loop<F: WorkerFactory>(
    shared: Arc<PoolShared<F>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(shared.config.eviction_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                evict_once(&shared).await;
                if let Err(e) = shared.replenish().await {
                    error!("failed to replenish idle workers: {e}");
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("eviction loop: shutdown requested");
                break;
            }
        }
    }

    debug!("eviction loop exited");
}

/// One eviction scan over the idle set, oldest first.
///
/// Each candidate is pulled out of the idle set while under examination,
/// so the scan never blocks borrows of other workers and never observes a
/// worker mid-transition. Active workers are never touched.
async fn evict_once<F: WorkerFactory>(shared: &Arc<PoolShared<F>>) {
    let threshold = shared.config.idle_eviction_threshold;
    // Bound the scan to the population at tick time so workers returned
    // mid-scan are not re-examined this cycle.
    let mut remaining = shared.state.lock().idle.len();
    // Healthy survivors are held out until the scan finishes; splicing
    // them back per-iteration would make the next pop_front re-examine
    // the same entry and the scan would never advance past it.
    let mut survivors: Vec<IdleEntry<F::Worker>> = Vec::new();

    while remaining > 0 {
        remaining -= 1;

        let entry = {
            let mut state = shared.state.lock();
            if state.closed {
                break;
            }
            match state.idle.pop_front() {
                Some(entry) => entry,
                None => break,
            }
        };

        let idle_for = entry.returned_at.elapsed();
        if idle_for >= threshold {
            destroy_idle(shared, entry, "idle past eviction threshold").await;
            continue;
        }

        let mut entry = entry;
        if shared.factory.health_check(&mut entry.worker).await {
            survivors.push(entry);
        } else {
            destroy_idle(shared, entry, "failed health check").await;
        }
    }

    // Rejoin survivors at the front in their original age order. If the
    // pool closed mid-scan the shutdown drain destroys them from here.
    if !survivors.is_empty() {
        let count = survivors.len();
        {
            let mut state = shared.state.lock();
            for entry in survivors.into_iter().rev() {
                state.idle.push_front(entry);
            }
        }
        for _ in 0..count {
            shared.available.notify_one();
        }
    }
}

async fn destroy_idle<F: WorkerFactory>(
    shared: &Arc<PoolShared<F>>,
    entry: IdleEntry<F::Worker>,
    reason: &'static str,
) {
    shared.state.lock().live -= 1;
    shared.available.notify_one();
    info!(worker_id = %entry.id, reason, "evicting idle worker");
    shared.factory.destroy(entry.worker).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFactory;

    /// Config with the eviction cycle parked far in the future.
    fn quiet_config() -> PoolConfig {
        PoolConfig::new()
            .with_min_idle(0)
            .with_max_total(2)
            .with_eviction_interval(Duration::from_secs(3600))
            .with_idle_eviction_threshold(Duration::from_secs(3600))
            .with_borrow_timeout(Some(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_borrow_and_release_futures_are_send() {
        fn assert_send<T: Send>(t: T) -> T {
            t
        }

        let factory = MockFactory::new();
        let pool = Pool::new(factory, quiet_config()).unwrap();

        // spawn-ability is what concurrent callers rely on; both futures
        // must stay Send even though the bookkeeping guard is not.
        let worker = assert_send(pool.borrow()).await.unwrap();
        assert_send(pool.release(worker)).await;
    }

    #[tokio::test]
    async fn test_lease_debug_shows_worker_id() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory, quiet_config()).unwrap();

        let worker = pool.borrow().await.unwrap();
        let repr = format!("{worker:?}");
        assert!(repr.contains(&worker.id().to_string()));
        pool.release(worker).await;
    }

    #[tokio::test]
    async fn test_borrow_creates_then_reuses() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config()).unwrap();

        let worker = pool.borrow().await.unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.live_count(), 1);

        pool.release(worker).await;
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);

        let again = pool.borrow().await.unwrap();
        assert_eq!(factory.created(), 1, "idle worker must be reused");
        pool.release(again).await;
    }

    #[tokio::test]
    async fn test_borrow_fails_immediately_with_zero_timeout() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config().with_max_total(1)).unwrap();

        let held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert_eq!(factory.created(), 1);

        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_invalidate_frees_capacity() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config().with_max_total(1)).unwrap();

        let worker = pool.borrow().await.unwrap();
        pool.invalidate(worker).await;
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(pool.live_count(), 0);

        // Capacity is free again; a fresh worker replaces the dead one.
        let worker = pool.borrow().await.unwrap();
        assert_eq!(factory.created(), 2);
        pool.release(worker).await;
    }

    #[tokio::test]
    async fn test_create_failure_leaves_bookkeeping_clean() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config()).unwrap();

        factory.set_fail_creates(true);
        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, PoolError::CreateFailed(_)));
        assert_eq!(pool.live_count(), 0);

        factory.set_fail_creates(false);
        let worker = pool.borrow().await.unwrap();
        pool.release(worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrow_waits_for_release() {
        let factory = MockFactory::new();
        let config = quiet_config()
            .with_max_total(1)
            .with_borrow_timeout(Some(Duration::from_secs(5)));
        let pool = Arc::new(Pool::new(factory.clone(), config).unwrap());

        let held = pool.borrow().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.borrow().await })
        };

        // Let the waiter block on the exhausted pool.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        pool.release(held).await;
        let worker = waiter.await.unwrap().unwrap();
        assert_eq!(factory.created(), 1, "the waiter must receive the returned worker");
        pool.release(worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrow_times_out_while_pool_stays_exhausted() {
        let factory = MockFactory::new();
        let config = quiet_config()
            .with_max_total(1)
            .with_borrow_timeout(Some(Duration::from_millis(200)));
        let pool = Pool::new(factory.clone(), config).unwrap();

        let _held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.unwrap_err();
        match err {
            PoolError::Exhausted { waited } => assert!(waited >= Duration::from_millis(200)),
            other => panic!("expected Exhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_creates_min_idle() {
        let factory = MockFactory::new();
        let config = quiet_config().with_min_idle(2).with_max_total(4);
        let pool = Pool::new(factory.clone(), config).unwrap();

        pool.prepare().await.unwrap();
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_dropped_lease_repairs_bookkeeping() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config()).unwrap();

        let worker = pool.borrow().await.unwrap();
        drop(worker);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.active_count(), 0);

        let worker = pool.borrow().await.unwrap();
        assert_eq!(factory.created(), 2);
        pool.release(worker).await;
    }

    #[tokio::test]
    async fn test_shutdown_destroys_idle_and_closes_borrow() {
        let factory = MockFactory::new();
        let pool = Pool::new(factory.clone(), quiet_config()).unwrap();

        let worker = pool.borrow().await.unwrap();
        pool.release(worker).await;

        pool.shutdown().await.unwrap();
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(pool.live_count(), 0);
        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_active_worker() {
        let factory = MockFactory::new();
        let config = quiet_config().with_shutdown_timeout(Duration::from_secs(5));
        let pool = Arc::new(Pool::new(factory.clone(), config).unwrap());

        let worker = pool.borrow().await.unwrap();
        let releaser = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                pool.release(worker).await;
            })
        };

        pool.shutdown().await.unwrap();
        releaser.await.unwrap();
        // The straggler was destroyed on return, not idled.
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_stuck_worker() {
        let factory = MockFactory::new();
        let config = quiet_config().with_shutdown_timeout(Duration::from_millis(100));
        let pool = Pool::new(factory.clone(), config).unwrap();

        let _stuck = pool.borrow().await.unwrap();
        let err = pool.shutdown().await.unwrap_err();
        assert!(matches!(err, PoolError::ShutdownTimeout));
    }
}
