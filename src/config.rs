use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::{LoadError, LoadResult};
use crate::observer::LoadObserver;

type CacheKeyFn<K> = Arc<dyn Fn(K) -> Result<K, String> + Send + Sync>;

/// Options recognised by [`crate::Loader::with_config`].
pub struct LoaderConfig<K> {
    /// Upper bound on keys per batch function invocation. `None` means unbounded.
    pub max_batch_size: Option<NonZeroUsize>,
    /// Whether settled results are memoized for the lifetime of the loader.
    pub cache: bool,
    /// Canonicalises a key before it is compared, cached or queued.
    ///
    /// Two keys are the same key to the loader iff their canonical forms are equal. Returning
    /// `Err` rejects the key with [`LoadError::InvalidKey`] before anything is queued.
    pub cache_key_fn: Option<CacheKeyFn<K>>,
    pub observer: Option<Arc<dyn LoadObserver<K>>>,
}

impl<K> Default for LoaderConfig<K> {
    fn default() -> Self {
        Self { max_batch_size: None, cache: true, cache_key_fn: None, observer: None }
    }
}

impl<K> Clone for LoaderConfig<K> {
    fn clone(&self) -> Self {
        Self {
            max_batch_size: self.max_batch_size,
            cache: self.cache,
            cache_key_fn: self.cache_key_fn.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<K> fmt::Debug for LoaderConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("max_batch_size", &self.max_batch_size)
            .field("cache", &self.cache)
            .field("cache_key_fn", &self.cache_key_fn.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl<K> LoaderConfig<K> {
    /// Splits dispatched batches into chunks of at most `max_batch_size` keys.
    ///
    /// Zero leaves batches unbounded.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = NonZeroUsize::new(max_batch_size);
        self
    }

    /// Disables memoization: settled results are delivered and then forgotten.
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn with_cache_key_fn<F>(mut self, cache_key_fn: F) -> Self
    where
        F: Fn(K) -> Result<K, String> + Send + Sync + 'static,
    {
        self.cache_key_fn = Some(Arc::new(cache_key_fn));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver<K>>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub(crate) fn canonical_key(&self, key: K) -> LoadResult<K> {
        match &self.cache_key_fn {
            Some(key_fn) => key_fn(key).map_err(|message| LoadError::InvalidKey { message }),
            None => Ok(key),
        }
    }
}
