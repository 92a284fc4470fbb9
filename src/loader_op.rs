use tokio::sync::oneshot;

use crate::error::LoadResult;
use crate::worker_stats::WorkerStats;

/// Set of possible requests that can be sent to the [`LoaderWorker`](crate::loader_worker::LoaderWorker)
///
/// The main categories of commands are Load, Prime, and Clear; each of which has a single and
/// many variant for convenience.
#[derive(Debug)]
pub enum LoaderOp<K, V> {
    /// Fetch data from the resource wrapped by this data loader (or the cache).
    Load(LoadRequest<K, V>),
    /// Several loads enqueued together. Repeated keys share one pending slot.
    LoadMany(Vec<LoadRequest<K, V>>),
    /// Add values to the cache that were fetched from elsewhere.
    Prime(K, V),
    PrimeMany(Vec<(K, V)>),
    /// Remove values from the cache so that they will be reloaded when they are next requested.
    Clear(K),
    ClearMany(Vec<K>),
    ClearAll,
    /// Report a snapshot of the worker's counters.
    Stats(oneshot::Sender<WorkerStats>),
}

/// One caller's ask for a single key.
#[derive(Debug)]
pub struct LoadRequest<K, V> {
    pub key: K,
    pub response_tx: oneshot::Sender<LoadResult<V>>,
}

impl<K, V> LoadRequest<K, V> {
    pub fn new(key: K) -> (Self, oneshot::Receiver<LoadResult<V>>) {
        let (response_tx, response_rx) = oneshot::channel();
        (Self { key, response_tx }, response_rx)
    }
}

/// Delivers a settled result to a waiting caller.
pub fn send_response<V>(response_tx: oneshot::Sender<LoadResult<V>>, response: LoadResult<V>) {
    if response_tx.send(response).is_err() {
        tracing::warn!("load receiver dropped before its result was delivered");
    }
}
