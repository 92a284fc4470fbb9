use thiserror::Error;

/// Failure delivered to a `load` caller.
///
/// Results fan out to every caller waiting on the same key, so the error is `Clone` and carries
/// the batch function's error rendered as a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The batch function marked this key's entry as failed.
    #[error("failed to load key: {message}")]
    Key { message: String },

    /// The batch function failed as a whole.
    #[error("batch load failed: {message}")]
    Batch { message: String },

    /// The batch function returned a result sequence that does not line up with its keys.
    #[error("batch function returned {actual} values for {expected} keys")]
    LengthMismatch { expected: usize, actual: usize },

    /// The key was rejected by the loader's configured key function.
    #[error("invalid key: {message}")]
    InvalidKey { message: String },

    /// The loader worker is no longer running.
    #[error("loader worker is no longer running")]
    WorkerClosed,
}

impl LoadError {
    /// Whether the failure covers a whole dispatched batch rather than a single key.
    ///
    /// Systemic failures are never cached, so a later `load` of the same key retries the fetch.
    pub fn is_systemic(&self) -> bool {
        matches!(self, LoadError::Batch { .. } | LoadError::LengthMismatch { .. })
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
