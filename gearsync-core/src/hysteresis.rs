//! Per-key hysteresis (debounce) scheduling.
//!
//! A [`HysteresisIndex`] maps a key (usually a file path) to at most one
//! pending action. Every [`HysteresisIndex::signal`] for a key cancels the
//! action armed for that key and arms the new one, so only the last signal of
//! a burst runs, once the key has been quiet for the configured delay.
//!
//! Replacement is serialised per key through the shard lock of a `DashMap`
//! entry; signals for unrelated keys never wait on each other. Each armed
//! action carries a generation number and a waking timer only fires if its
//! generation is still the one stored for the key, which closes the race
//! between an expiring timer and a concurrent replacement.
//!
//! Fired actions run on the runtime the index was built with, never on the
//! caller's thread. The entry is removed before the action starts, so a signal
//! arriving while the action is in flight begins a fresh cycle.

use std::{
    fmt,
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace, warn};

/// Quiet period applied when the configuration does not provide one.
pub const DEFAULT_HYSTERESIS: Duration = Duration::from_secs(5);

/// Debounce index keyed by `K`.
///
/// Cloning is cheap and every clone drives the same underlying map.
pub struct HysteresisIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Arc<IndexInner<K>>,
}

struct IndexInner<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    delay: Duration,
    pending: DashMap<K, PendingAction>,
    generation: AtomicU64,
    runtime: Handle,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

struct PendingAction {
    generation: u64,
    deadline: Instant,
    timer: JoinHandle<()>,
}

impl<K> Clone for HysteresisIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for HysteresisIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HysteresisIndex")
            .field("delay", &self.inner.delay)
            .field("pending", &self.inner.pending.len())
            .field("tracked_tasks", &self.inner.tasks.len())
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl<K> HysteresisIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Build an index that fires actions on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime; use
    /// [`HysteresisIndex::with_handle`] in that case.
    pub fn new(delay: Duration) -> Self {
        Self::with_handle(delay, Handle::current())
    }

    pub fn with_handle(delay: Duration, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                delay,
                pending: DashMap::new(),
                generation: AtomicU64::new(0),
                runtime,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Arm `action` for `key`, replacing whatever was pending for it.
    ///
    /// Returns immediately. The return value is `false` only once the index
    /// has been shut down, in which case the action is dropped unrun.
    pub fn signal<F, Fut>(&self, key: K, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            debug!("hysteresis index is shut down; dropping signal");
            return false;
        }
        self.insert_pending(key, action)
    }

    // A shutdown may land between the check in `signal` and the insert below;
    // its `retain` pass would then miss this entry, so re-check afterwards.
    fn insert_pending<F, Fut>(&self, key: K, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.inner.delay;

        match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let timer = self.arm(occupied.key().clone(), generation, deadline, action);
                let previous = occupied.insert(PendingAction {
                    generation,
                    deadline,
                    timer,
                });
                previous.timer.abort();
                trace!(
                    superseded = previous.generation,
                    generation, "hysteresis timer restarted"
                );
            }
            Entry::Vacant(vacant) => {
                let timer = self.arm(vacant.key().clone(), generation, deadline, action);
                vacant.insert(PendingAction {
                    generation,
                    deadline,
                    timer,
                });
                trace!(generation, "hysteresis timer armed");
            }
        }

        if self.inner.shutdown.is_cancelled() {
            if let Some((_, pending)) = self
                .inner
                .pending
                .remove_if(&key, |_, pending| pending.generation == generation)
            {
                pending.timer.abort();
            }
            debug!("hysteresis index shut down while arming; dropping signal");
            return false;
        }

        true
    }

    fn arm<F, Fut>(&self, key: K, generation: u64, deadline: Instant, action: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => return,
                    _ = sleep_until(deadline) => {}
                }

                // Only the generation currently stored for the key may fire.
                let claimed = inner
                    .pending
                    .remove_if(&key, |_, pending| pending.generation == generation)
                    .is_some();
                if !claimed || inner.shutdown.is_cancelled() {
                    trace!(generation, "hysteresis timer superseded");
                    return;
                }

                action().await;
            },
            &self.inner.runtime,
        )
    }

    /// Number of keys with an armed, not yet fired, action.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.contains_key(key)
    }

    /// Time left before the action pending for `key` fires.
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        self.inner
            .pending
            .get(key)
            .map(|pending| pending.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting signals, abandon every pending action and wait up to
    /// `grace` for actions that already fired. In-flight actions are never
    /// aborted. Returns the number of abandoned pending actions.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.shutdown.cancel();

        let mut abandoned = 0usize;
        self.inner.pending.retain(|_, pending| {
            pending.timer.abort();
            abandoned += 1;
            false
        });

        self.inner.tasks.close();
        if timeout(grace, self.inner.tasks.wait()).await.is_err() {
            warn!(
                in_flight = self.inner.tasks.len(),
                "actions still running after shutdown grace period"
            );
        }

        debug!(abandoned, "hysteresis index shut down");
        abandoned
    }
}
