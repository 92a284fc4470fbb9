/// Instrumentation hooks invoked by the loader worker.
///
/// All callbacks run synchronously on the worker task, so they should be cheap (bump a counter,
/// emit an event). Every method has an empty default.
pub trait LoadObserver<K>: Send + Sync {
    /// A chunk of keys was handed to the batch function, in the order it receives them.
    fn on_batch_dispatched(&self, _keys: &[K]) {}

    /// A load was answered from the cache without fetching.
    fn on_cache_hit(&self, _key: &K) {}

    /// A load joined the fetch already pending for the same key.
    fn on_coalesced(&self, _key: &K) {}

    /// A dispatched chunk settled. `failed` counts keys that resolved to a failure.
    fn on_batch_completed(&self, _keys: &[K], _failed: usize) {}
}
