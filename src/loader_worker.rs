use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::slice;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::{
    batch_function::BatchFunction,
    cache::Cache,
    config::LoaderConfig,
    error::{LoadError, LoadResult},
    loader_op::{send_response, LoadRequest, LoaderOp},
    worker_stats::WorkerStats,
};

/// Identifies one pending fetch of one key. Allocated in increasing order.
type SlotId = u64;

/// A dispatched chunk after its batch function invocation settled.
struct ChunkOutcome<K, V> {
    keys: Vec<K>,
    slots: Vec<SlotId>,
    result: LoadResult<Vec<LoadResult<V>>>,
}

/// A `LoaderWorker` is the "single-thread" worker task that actually does the loading work.
///
/// Once started, it runs in a loop until the parent Loader aborts it's `JoinHandle` or drops the
/// request queue tx channel. All loader state (cache, open batch, pending slots) is owned here and
/// only ever touched from this task.
///
/// One cycle through the request side of the loop may be called an "execution frame":
///
/// 1. Wait for the first op on the request queue.
/// 2. Yield once to the scheduler so that every task woken in the same step gets to enqueue its
///    requests, then synchronously drain the queue. Prime and Clear requests are resolved
///    immediately against the cache. A Load request is answered from the cache when possible,
///    joins the pending slot of its key when that key is already being fetched, and otherwise
///    opens a new slot and appends the key to the open batch.
/// 3. Seal the open batch and dispatch it, split into chunks of at most `max_batch_size` keys,
///    one `BatchFunction` invocation per chunk.
///
/// Dispatched chunks run concurrently with later frames. When a chunk settles, its values are
/// cached (unless the key was cleared in the meantime) and handed to every caller waiting on the
/// corresponding slot. A chunk that fails as a whole fails all of its callers and caches nothing.
pub struct LoaderWorker<K, V, F, CacheT, ContextT> {
    cache: Option<CacheT>,
    config: LoaderConfig<K>,
    request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
    /// Keys collected during the current frame, in first-request order.
    open_batch: Vec<(K, SlotId)>,
    /// The slot each not yet settled key currently resolves through.
    pending_keys: HashMap<K, SlotId>,
    waiters: HashMap<SlotId, Vec<oneshot::Sender<LoadResult<V>>>>,
    in_flight: FuturesUnordered<BoxFuture<'static, ChunkOutcome<K, V>>>,
    next_slot: SlotId,
    /// Slots at or above this id belong to the open batch.
    open_since: SlotId,
    context: Arc<ContextT>,
    stats: WorkerStats,
    phantom_batch_function: PhantomData<F>,
}

impl<K, V, F, CacheT, ContextT> LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Debug + Send,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    F::Error: 'static,
    CacheT: Cache<K = K, V = LoadResult<V>>,
    ContextT: Send + Sync + 'static,
{
    pub fn new(
        cache: CacheT,
        config: LoaderConfig<K>,
        request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
        context: ContextT,
    ) -> Self {
        Self {
            cache: config.cache.then_some(cache),
            config,
            request_rx,
            open_batch: Vec::new(),
            pending_keys: HashMap::new(),
            waiters: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            next_slot: 0,
            open_since: 0,
            context: Arc::new(context),
            stats: WorkerStats::new(std::any::type_name::<(K, V)>()),
            phantom_batch_function: PhantomData,
        }
    }

    pub async fn start(mut self) {
        loop {
            tokio::select! {
                op = self.request_rx.recv() => match op {
                    None => {
                        tracing::info!("Tx channel closed. Terminating LoaderWorker.");
                        return;
                    }
                    Some(op) => self.run_frame(op).await,
                },
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.complete(outcome);
                }
            }
        }
    }

    async fn run_frame(&mut self, first: LoaderOp<K, V>) {
        self.mux_op(first);
        tokio::task::yield_now().await;
        while let Some(Some(op)) = self.request_rx.recv().now_or_never() {
            self.mux_op(op);
        }
        self.dispatch();
    }

    fn mux_op(&mut self, op: LoaderOp<K, V>) {
        match op {
            LoaderOp::Load(request) => {
                self.stats.record_load_request(1);
                self.enqueue(request);
            }
            LoaderOp::LoadMany(requests) => {
                self.stats.record_load_request(saturating_u32(requests.len()));
                for request in requests {
                    self.enqueue(request);
                }
            }
            LoaderOp::Prime(key, value) => self.prime(vec![(key, value)]),
            LoaderOp::PrimeMany(key_vals) => self.prime(key_vals),
            LoaderOp::Clear(key) => self.clear(slice::from_ref(&key)),
            LoaderOp::ClearMany(keys) => self.clear(&keys),
            LoaderOp::ClearAll => {
                tracing::debug!("clearing all cache entries");
                if let Some(cache) = self.cache.as_mut() {
                    cache.flush();
                }
                let open_since = self.open_since;
                self.pending_keys.retain(|_, slot| *slot >= open_since);
            }
            LoaderOp::Stats(response_tx) => {
                if response_tx.send(self.stats.clone()).is_err() {
                    tracing::warn!("stats receiver dropped");
                }
            }
        }
    }

    fn enqueue(&mut self, request: LoadRequest<K, V>) {
        let LoadRequest { key, response_tx } = request;

        if let Some(cached) = self.cached(&key) {
            tracing::trace!(?key, "cache hit");
            self.stats.record_cache_hit();
            if let Some(observer) = &self.config.observer {
                observer.on_cache_hit(&key);
            }
            send_response(response_tx, cached);
            return;
        }

        if let Some(slot) = self.pending_keys.get(&key) {
            tracing::trace!(?key, slot, "joining pending fetch");
            self.stats.record_coalesced();
            if let Some(observer) = &self.config.observer {
                observer.on_coalesced(&key);
            }
            self.waiters.entry(*slot).or_default().push(response_tx);
            return;
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        self.pending_keys.insert(key.clone(), slot);
        self.waiters.insert(slot, vec![response_tx]);
        self.open_batch.push((key, slot));
    }

    fn cached(&self, key: &K) -> Option<LoadResult<V>> {
        let cache = self.cache.as_ref()?;
        cache.get(slice::from_ref(key)).pop().flatten().cloned()
    }

    /// Keys that are cached or still pending keep the value their fetch produces.
    fn prime(&mut self, key_vals: Vec<(K, V)>) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        let pending_keys = &self.pending_keys;
        let fresh = key_vals
            .into_iter()
            .filter(|(key, _)| !cache.contains(key) && !pending_keys.contains_key(key))
            .collect::<Vec<_>>();
        tracing::debug!(primed = fresh.len());
        cache.insert_many(fresh.into_iter().map(|(key, value)| (key, Ok(value))));
    }

    /// Slots of keys that are already in flight are detached, so their result is delivered but
    /// not cached. Slots still in the open batch are kept to avoid queueing a key twice.
    fn clear(&mut self, keys: &[K]) {
        tracing::debug!(?keys, "clearing cache entries");
        if let Some(cache) = self.cache.as_mut() {
            cache.remove(keys);
        }
        for key in keys {
            if matches!(self.pending_keys.get(key), Some(slot) if *slot < self.open_since) {
                self.pending_keys.remove(key);
            }
        }
    }

    fn dispatch(&mut self) {
        self.open_since = self.next_slot;
        if self.open_batch.is_empty() {
            return;
        }

        let (keys, slots): (Vec<K>, Vec<SlotId>) =
            std::mem::take(&mut self.open_batch).into_iter().unzip();
        let chunk_size = self.config.max_batch_size.map_or(keys.len(), NonZeroUsize::get);

        for (keys, slots) in keys.chunks(chunk_size).zip(slots.chunks(chunk_size)) {
            let keys = keys.to_vec();
            let slots = slots.to_vec();
            tracing::debug!(?keys, "dispatching batch");
            self.stats.record_load_exec(saturating_u32(keys.len()));
            if let Some(observer) = &self.config.observer {
                observer.on_batch_dispatched(&keys);
            }

            let context = Arc::clone(&self.context);
            self.in_flight.push(
                async move {
                    let result = match F::load(&keys, &*context).await {
                        Ok(values) if values.len() == keys.len() => Ok(values
                            .into_iter()
                            .map(|value| {
                                value.map_err(|e| LoadError::Key { message: e.to_string() })
                            })
                            .collect()),
                        Ok(values) => Err(LoadError::LengthMismatch {
                            expected: keys.len(),
                            actual: values.len(),
                        }),
                        Err(e) => Err(LoadError::Batch { message: e.to_string() }),
                    };
                    ChunkOutcome { keys, slots, result }
                }
                .boxed(),
            );
        }
    }

    fn complete(&mut self, outcome: ChunkOutcome<K, V>) {
        let ChunkOutcome { keys, slots, result } = outcome;
        match result {
            Ok(values) => {
                let failed = values.iter().filter(|value| value.is_err()).count();
                for ((key, slot), value) in keys.iter().zip(slots).zip(values) {
                    if self.release(key, slot) {
                        if let Some(cache) = self.cache.as_mut() {
                            cache.insert(key.clone(), value.clone());
                        }
                    }
                    self.resolve(slot, value);
                }
                tracing::debug!(?keys, failed, "batch completed");
                self.stats.record_load_exec_completed(
                    saturating_u32(keys.len() - failed),
                    saturating_u32(failed),
                );
                if let Some(observer) = &self.config.observer {
                    observer.on_batch_completed(&keys, failed);
                }
            }
            Err(error) => {
                tracing::debug!(?keys, %error, "batch failed");
                self.stats.record_batch_failure();
                for (key, slot) in keys.iter().zip(slots) {
                    self.release(key, slot);
                    self.resolve(slot, Err(error.clone()));
                }
                if let Some(observer) = &self.config.observer {
                    observer.on_batch_completed(&keys, keys.len());
                }
            }
        }
    }

    /// Unregisters a settled slot. Returns whether the key still resolved through it.
    fn release(&mut self, key: &K, slot: SlotId) -> bool {
        if self.pending_keys.get(key) == Some(&slot) {
            self.pending_keys.remove(key);
            true
        } else {
            false
        }
    }

    fn resolve(&mut self, slot: SlotId, response: LoadResult<V>) {
        for response_tx in self.waiters.remove(&slot).unwrap_or_default() {
            send_response(response_tx, response.clone());
        }
    }
}

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl<K, V, F, CacheT, ContextT> Drop for LoaderWorker<K, V, F, CacheT, ContextT> {
    fn drop(&mut self) {
        tracing::debug!(worker_stats = ?self.stats, "loader worker stopped");
    }
}
