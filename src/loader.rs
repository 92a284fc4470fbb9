use std::ops::Drop;
use std::{collections::HashMap, fmt::Debug, hash::Hash};

use futures::future;
use tokio::sync::{mpsc, oneshot};
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    config::LoaderConfig,
    error::{LoadError, LoadResult},
    loader_op::{LoadRequest, LoaderOp},
    loader_worker::LoaderWorker,
    worker_stats::WorkerStats,
};

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem, e.g. when a federation gateway asks a subgraph to resolve many entity references
/// during one query.
///
/// Users can call [`Loader::load`] and [`Loader::load_many`] to fetch values from the underlying
/// resource or cache. Every `load` issued by concurrently running resolvers within the same
/// scheduling step lands in one batch, so the [`BatchFunction`] sees all of their keys in a single
/// invocation, in the order they were first requested. The cache can be cleared with calls to
/// [`Loader::clear`], [`Loader::clear_many`] and [`Loader::clear_all`], and values can be added to
/// the cache out-of-band through the use of [`Loader::prime`] and [`Loader::prime_many`].
///
/// The cache never evicts on its own. A `Loader` is meant to live for one unit of work (typically
/// one incoming request) and then be dropped; build a fresh one for the next request instead of
/// sharing one across requests.
///
/// The `Loader` struct acts as an intermediary between the async domain in which `load` calls are
/// invoked and the pseudo-single-threaded domain of the `LoaderWorker`. Callers can invoke the
/// `Loader` from multiple parallel tasks, and the loader will enqueue the requested operations on
/// the request queue for processing by its `LoaderWorker`. The worker processes the requests
/// sequentially and provides results via response oneshot channels back to the Loader.
pub struct Loader<K, V> {
    request_tx: mpsc::UnboundedSender<LoaderOp<K, V>>,
    config: LoaderConfig<K>,
    load_task_handle: tokio::task::JoinHandle<()>,
}

impl<K, V> Drop for Loader<K, V> {
    fn drop(&mut self) {
        self.load_task_handle.abort();
    }
}

impl<K, V> Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Debug + Send,
{
    /// Creates a new Loader for the provided BatchFunction and Context type, with the default
    /// [`LoaderConfig`].
    ///
    /// Note: the batch function is passed in as a marker for type inference.
    pub fn new<F, ContextT>(batch_function: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
        F::Error: 'static,
    {
        Self::with_config(batch_function, context, LoaderConfig::default())
    }

    /// Creates a new Loader with explicit options.
    ///
    /// Must be called from within a tokio runtime; the worker task is spawned immediately.
    pub fn with_config<F, ContextT>(_: F, context: ContextT, config: LoaderConfig<K>) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
        F::Error: 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::trace_span!("LoaderWorker", kv = std::any::type_name::<(K, V)>());
        let worker = LoaderWorker::<K, V, F, HashMap<K, LoadResult<V>>, ContextT>::new(
            HashMap::new(),
            config.clone(),
            rx,
            context,
        );
        Self {
            request_tx: tx,
            config,
            load_task_handle: tokio::task::spawn(worker.start().instrument(span)),
        }
    }

    /// Loads a value from the underlying resource.
    ///
    /// If the value is already in the loader cache, it is returned as soon as the request is
    /// processed. If the key is already being fetched, the caller shares that fetch. Otherwise,
    /// the requested key is enqueued for batch loading in the next loader execution frame.
    ///
    /// A key rejected by the configured key function fails with [`LoadError::InvalidKey`] without
    /// reaching the worker.
    pub async fn load(&self, key: K) -> LoadResult<V> {
        let key = self.config.canonical_key(key)?;
        let (request, response_rx) = LoadRequest::new(key);
        self.send(LoaderOp::Load(request))?;
        response_rx.await.map_err(|_| LoadError::WorkerClosed)?
    }

    /// Loads many values at once.
    ///
    /// Results come back in the order of `keys`; repeated keys share one fetch and carry the same
    /// result. The outer error is reserved for rejected keys and a stopped worker; per key
    /// failures are reported in place.
    pub async fn load_many(&self, keys: Vec<K>) -> LoadResult<Vec<LoadResult<V>>> {
        let keys = keys
            .into_iter()
            .map(|key| self.config.canonical_key(key))
            .collect::<LoadResult<Vec<_>>>()?;
        let (requests, receivers): (Vec<_>, Vec<_>) =
            keys.into_iter().map(LoadRequest::new).unzip();
        self.send(LoaderOp::LoadMany(requests))?;
        Ok(future::join_all(receivers)
            .await
            .into_iter()
            .map(|response| response.unwrap_or_else(|_| Err(LoadError::WorkerClosed)))
            .collect())
    }

    /// Adds a value to the cache.
    ///
    /// An entry that is already cached is left untouched; clear it first to overwrite it.
    pub fn prime(&self, key: K, value: V) -> LoadResult<()> {
        let key = self.config.canonical_key(key)?;
        self.send(LoaderOp::Prime(key, value))
    }

    /// Adds many values to the cache at once.
    pub fn prime_many(&self, key_vals: Vec<(K, V)>) -> LoadResult<()> {
        let key_vals = key_vals
            .into_iter()
            .map(|(key, value)| Ok((self.config.canonical_key(key)?, value)))
            .collect::<LoadResult<Vec<_>>>()?;
        self.send(LoaderOp::PrimeMany(key_vals))
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested. Callers already waiting on an
    /// in-flight fetch of the key still receive its result.
    pub fn clear(&self, key: K) -> LoadResult<()> {
        let key = self.config.canonical_key(key)?;
        self.send(LoaderOp::Clear(key))
    }

    /// Removes multiple values from the cache at once.
    ///
    /// These keys will be reloaded when requested.
    pub fn clear_many(&self, keys: Vec<K>) -> LoadResult<()> {
        let keys = keys
            .into_iter()
            .map(|key| self.config.canonical_key(key))
            .collect::<LoadResult<Vec<_>>>()?;
        self.send(LoaderOp::ClearMany(keys))
    }

    /// Empties the cache.
    pub fn clear_all(&self) -> LoadResult<()> {
        self.send(LoaderOp::ClearAll)
    }

    /// Returns a snapshot of the worker's counters.
    ///
    /// The snapshot is taken after every op enqueued before this call has been processed.
    pub async fn stats(&self) -> LoadResult<WorkerStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(LoaderOp::Stats(response_tx))?;
        response_rx.await.map_err(|_| LoadError::WorkerClosed)
    }

    fn send(&self, op: LoaderOp<K, V>) -> LoadResult<()> {
        self.request_tx.send(op).map_err(|_| LoadError::WorkerClosed)
    }
}
