//! Keyed cache of asynchronous query results.
//!
//! Entries live in a `DashMap`; every mutation is a short synchronous
//! critical section that never spans an `.await`. In-flight fetches are
//! `Shared` futures so concurrent callers for the same key and generation
//! join one network call. Each fetch is also spawned onto the runtime, so an
//! entry settles even when every caller has gone away.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use common::Error;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

/// Requirements on cache keys.
///
/// A key must capture every parameter that affects the result.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Whether the cached value depends on who is logged in. Identity-scoped
    /// entries are purged when the session ends.
    fn identity_scoped(&self) -> bool {
        true
    }
}

/// Fetch policy for `QueryCache::request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch as soon as the key has no settled or pending value.
    Auto,
    /// Never fetch until `trigger` is called.
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
    #[default]
    Idle,
    Pending,
    Settled,
    Failed,
}

/// Produces a fresh fetch future each time it is called.
pub type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, Error>> + Send + Sync>;

/// Wrap an async closure as a `Fetcher`.
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, Error>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

type Outcome<V> = Result<Arc<V>, Error>;
type InFlight<V> = Shared<BoxFuture<'static, Outcome<V>>>;

/// Point-in-time view of one cache entry.
#[derive(Debug)]
pub struct QueryState<V> {
    pub status: QueryStatus,
    /// Last successful value. Kept while a refetch is pending or has failed.
    pub value: Option<Arc<V>>,
    pub error: Option<Error>,
    pub generation: u64,
}

impl<V> Clone for QueryState<V> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
            generation: self.generation,
        }
    }
}

impl<V> QueryState<V> {
    pub fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            value: None,
            error: None,
            generation: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn data(&self) -> Option<&V> {
        self.value.as_deref()
    }
}

struct Slot<V> {
    status: QueryStatus,
    value: Option<Arc<V>>,
    error: Option<Error>,
    generation: u64,
    fetcher: Option<Fetcher<V>>,
    in_flight: Option<InFlight<V>>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            status: QueryStatus::Idle,
            value: None,
            error: None,
            generation: 0,
            fetcher: None,
            in_flight: None,
        }
    }

    fn snapshot(&self) -> QueryState<V> {
        QueryState {
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
            generation: self.generation,
        }
    }

    /// The in-flight fetch for the current generation, if any.
    fn joinable(&self) -> Option<InFlight<V>> {
        match self.status {
            QueryStatus::Pending => self.in_flight.clone(),
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.status = QueryStatus::Idle;
        self.value = None;
        self.error = None;
        self.in_flight = None;
    }
}

struct Inner<K, V> {
    entries: DashMap<K, Slot<V>>,
}

impl<K: CacheKey, V> Inner<K, V> {
    /// Record a fetch outcome unless a newer generation owns the entry.
    fn settle(&self, key: &K, generation: u64, outcome: &Outcome<V>) {
        let Some(mut slot) = self.entries.get_mut(key) else {
            debug!(?key, generation, "entry removed before fetch resolved; discarding");
            return;
        };
        if slot.generation != generation {
            debug!(
                ?key,
                generation,
                current = slot.generation,
                "discarding stale response"
            );
            return;
        }

        slot.in_flight = None;
        match outcome {
            Ok(value) => {
                slot.status = QueryStatus::Settled;
                slot.value = Some(Arc::clone(value));
                slot.error = None;
            }
            Err(e) => {
                warn!(?key, generation, "query failed: {}", e);
                slot.status = QueryStatus::Failed;
                slot.error = Some(e.clone());
            }
        }
    }
}

/// Thread-safe query cache. Cloning shares the underlying entries.
pub struct QueryCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle to a `QueryCache`. Holding one keeps neither the
/// entries nor their fetchers alive.
pub struct WeakQueryCache<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> Clone for WeakQueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> WeakQueryCache<K, V> {
    pub fn upgrade(&self) -> Option<QueryCache<K, V>> {
        self.inner.upgrade().map(|inner| QueryCache { inner })
    }

    /// False once every `QueryCache` handle has been dropped.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> Default for QueryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> QueryCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
            }),
        }
    }

    /// Current snapshot for `key`; `Idle` if the key was never requested.
    pub fn state(&self, key: &K) -> QueryState<V> {
        self.inner
            .entries
            .get(key)
            .map(|slot| slot.snapshot())
            .unwrap_or_else(QueryState::idle)
    }

    /// Register `fetcher` for `key` and, in `Auto` mode, make sure a value is
    /// loaded or loading.
    ///
    /// `Auto` starts a fetch for `Idle`/`Failed` entries, joins a pending one,
    /// and returns a settled value as is. `Manual` never fetches and returns
    /// immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn request(&self, key: K, fetcher: Fetcher<V>, mode: FetchMode) -> QueryState<V> {
        let in_flight = {
            let mut slot = self.inner.entries.entry(key.clone()).or_insert_with(Slot::new);
            slot.fetcher = Some(fetcher);
            match (mode, slot.status) {
                (FetchMode::Manual, _) | (FetchMode::Auto, QueryStatus::Settled) => None,
                (FetchMode::Auto, QueryStatus::Pending) => slot.joinable(),
                (FetchMode::Auto, QueryStatus::Idle | QueryStatus::Failed) => {
                    self.start(&key, &mut slot)
                }
            }
        };

        match in_flight {
            Some(fut) => self.wait(&key, fut).await,
            None => self.state(&key),
        }
    }

    /// Force a fetch for `key`. Joins the in-flight fetch of the current
    /// generation if there is one; otherwise starts a new generation.
    pub async fn trigger(&self, key: &K) -> QueryState<V> {
        let in_flight = {
            let Some(mut slot) = self.inner.entries.get_mut(key) else {
                warn!(?key, "trigger on a key that was never requested");
                return QueryState::idle();
            };
            match slot.joinable() {
                Some(fut) => Some(fut),
                None => self.start(key, &mut slot),
            }
        };

        match in_flight {
            Some(fut) => self.wait(key, fut).await,
            None => self.state(key),
        }
    }

    /// Start a new generation unconditionally. Any fetch still in flight for
    /// `key` is superseded and its result discarded when it arrives.
    pub async fn refetch(&self, key: &K) -> QueryState<V> {
        let in_flight = {
            let Some(mut slot) = self.inner.entries.get_mut(key) else {
                warn!(?key, "refetch on a key that was never requested");
                return QueryState::idle();
            };
            self.start(key, &mut slot)
        };

        match in_flight {
            Some(fut) => self.wait(key, fut).await,
            None => self.state(key),
        }
    }

    /// Reset every entry whose key matches `predicate` to `Idle`.
    ///
    /// Values are dropped and the generation bumped, so fetches in flight for
    /// those entries are discarded. Registered fetchers are kept so a later
    /// `trigger` still works. Returns the number of entries reset.
    pub fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut count = 0;
        for mut slot in self.inner.entries.iter_mut() {
            if predicate(slot.key()) {
                slot.reset();
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "invalidated cache entries");
        }
        count
    }

    /// Drop every entry and registered fetcher.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn downgrade(&self) -> WeakQueryCache<K, V> {
        WeakQueryCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Begin a new generation for `slot`. Caller holds the entry lock.
    fn start(&self, key: &K, slot: &mut Slot<V>) -> Option<InFlight<V>> {
        let Some(fetch) = slot.fetcher.clone() else {
            warn!(?key, "no fetcher registered; cannot fetch");
            return None;
        };

        slot.generation += 1;
        slot.status = QueryStatus::Pending;
        slot.error = None;
        let generation = slot.generation;
        debug!(?key, generation, "fetch started");

        let inner = Arc::downgrade(&self.inner);
        let owned_key = key.clone();
        let fut = async move {
            let outcome = fetch().await.map(Arc::new);
            if let Some(inner) = inner.upgrade() {
                inner.settle(&owned_key, generation, &outcome);
            }
            outcome
        }
        .boxed()
        .shared();

        slot.in_flight = Some(fut.clone());
        tokio::spawn(fut.clone());
        Some(fut)
    }

    /// Await `fut`, then follow any newer generation that superseded it, and
    /// return the entry once nothing is pending.
    async fn wait(&self, key: &K, mut fut: InFlight<V>) -> QueryState<V> {
        loop {
            let _ = fut.await;
            let next = self.inner.entries.get(key).and_then(|slot| slot.joinable());
            match next {
                Some(newer) => fut = newer,
                None => return self.state(key),
            }
        }
    }
}
