use std::fmt::Display;

use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` may fetch
/// batched data from some resource. The `BatchFunction` receives a slice of keys
/// that have been requested during the `Loader`'s most recent execution frame, and some user
/// defined context struct.
///
/// Keys are passed in the order they were first requested and never contain duplicates. The
/// returned sequence must hold exactly one entry per key, positionally aligned with `keys`:
/// `result[i]` answers `keys[i]`. An `Err` entry fails only the caller(s) of that key. Returning
/// `Err` for the whole call, or a sequence of the wrong length, fails every key of the batch and
/// nothing is cached for them.
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Arc`).
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error: Display + Send;

    async fn load(
        keys: &[K],
        context: &Self::Context,
    ) -> Result<Vec<Result<V, Self::Error>>, Self::Error>;
}
