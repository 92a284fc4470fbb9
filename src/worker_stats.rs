/// Counters kept by a loader worker over its lifetime.
///
/// A snapshot is available through [`crate::Loader::stats`]; the final values are logged at debug
/// level when the worker stops.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorkerStats {
    /// Human readable name used to identify this worker stats when it is reported.
    pub tag: &'static str,
    /// Number of load requests that were received by the worker.
    pub load_requests: u32,
    /// The total number of keys that were requested for loading (not necessarily unique).
    pub items_requested: u32,
    /// The number of keys that were immediately found in the loader cache.
    pub cache_hits: u32,
    /// The number of keys that joined a fetch already pending for the same key.
    pub coalesced: u32,
    /// Number of batch function invocations.
    pub loads: u32,
    /// The average number of keys passed to a single batch function invocation.
    pub average_batch_size: f32,
    /// The max number of keys passed to a single batch function invocation.
    pub max_batch_size: u32,
    /// The min number of keys passed to a single batch function invocation.
    pub min_batch_size: u32,
    /// The total number of keys that resolved to a value.
    pub items_loaded: u32,
    /// The number of keys the batch function marked as failed.
    pub key_failures: u32,
    /// The number of invocations that failed as a whole.
    pub batch_failures: u32,
}

impl WorkerStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, ..Default::default() }
    }

    pub fn record_load_request(&mut self, items_requested: u32) {
        self.load_requests = self.load_requests.saturating_add(1);
        self.items_requested = self.items_requested.saturating_add(items_requested);
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits = self.cache_hits.saturating_add(1);
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced = self.coalesced.saturating_add(1);
    }

    pub fn record_load_exec(&mut self, batch_size: u32) {
        let new_total_load = self.loads.saturating_add(1);
        self.average_batch_size = (((self.average_batch_size as f64 * self.loads as f64)
            + batch_size as f64)
            / new_total_load as f64) as f32;
        if self.loads == 0 || batch_size < self.min_batch_size {
            self.min_batch_size = batch_size;
        }
        if batch_size > self.max_batch_size {
            self.max_batch_size = batch_size;
        }
        self.loads = new_total_load;
    }

    pub fn record_load_exec_completed(&mut self, loaded_item_count: u32, failed_item_count: u32) {
        self.items_loaded = self.items_loaded.saturating_add(loaded_item_count);
        self.key_failures = self.key_failures.saturating_add(failed_item_count);
    }

    pub fn record_batch_failure(&mut self) {
        self.batch_failures = self.batch_failures.saturating_add(1);
    }
}
