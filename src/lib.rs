mod batch_function;
mod cache;
mod config;
mod error;
mod loader;
mod loader_op;
mod loader_worker;
mod observer;
mod worker_stats;

pub use batch_function::BatchFunction;
pub use config::LoaderConfig;
pub use error::{LoadError, LoadResult};
pub use loader::Loader;
pub use observer::LoadObserver;
pub use worker_stats::WorkerStats;
