use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use batchload_rs::{BatchFunction, LoadError, LoadObserver, Loader, LoaderConfig};
use futures::future;

/// Records every invocation; failure modes are toggled by the test.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
    short: AtomicBool,
    broken_keys: Vec<String>,
}

impl Recorder {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

struct RecordingFetch;

#[async_trait]
impl BatchFunction<String, String> for RecordingFetch {
    type Context = Arc<Recorder>;
    type Error = String;

    async fn load(
        keys: &[String],
        context: &Arc<Recorder>,
    ) -> Result<Vec<Result<String, String>>, String> {
        context.calls.lock().unwrap().push(keys.to_vec());
        if context.fail.load(Ordering::SeqCst) {
            return Err("backend unavailable".to_owned());
        }
        let mut values = keys
            .iter()
            .map(|key| {
                if context.broken_keys.contains(key) {
                    Err(format!("{} is broken", key))
                } else {
                    Ok(format!("value-{}", key))
                }
            })
            .collect::<Vec<_>>();
        if context.short.load(Ordering::SeqCst) {
            values.pop();
        }
        Ok(values)
    }
}

#[derive(Default)]
struct RecordingObserver {
    dispatched: Mutex<Vec<Vec<String>>>,
    cache_hits: AtomicUsize,
    coalesced: AtomicUsize,
    completed: Mutex<Vec<(usize, usize)>>,
}

impl LoadObserver<String> for RecordingObserver {
    fn on_batch_dispatched(&self, keys: &[String]) {
        self.dispatched.lock().unwrap().push(keys.to_vec());
    }

    fn on_cache_hit(&self, _key: &String) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_coalesced(&self, _key: &String) {
        self.coalesced.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_completed(&self, keys: &[String], failed: usize) {
        self.completed.lock().unwrap().push((keys.len(), failed));
    }
}

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

fn value(key: &str) -> Result<String, LoadError> {
    Ok(format!("value-{}", key))
}

#[tokio::test]
async fn coalesces_concurrent_loads_in_call_order() {
    let recorder = Arc::new(Recorder::default());
    let loader = Loader::new(RecordingFetch, recorder.clone());

    let results =
        future::join_all(keys(&["c", "a", "b"]).into_iter().map(|key| loader.load(key))).await;

    assert_eq!(results, vec![value("c"), value("a"), value("b")]);
    assert_eq!(recorder.calls(), vec![keys(&["c", "a", "b"])]);
}

#[tokio::test]
async fn separate_steps_start_new_batches() {
    let recorder = Arc::new(Recorder::default());
    let loader = Loader::new(RecordingFetch, recorder.clone());

    assert_eq!(loader.load("a".to_owned()).await, value("a"));
    assert_eq!(loader.load("b".to_owned()).await, value("b"));
    assert_eq!(recorder.calls(), vec![keys(&["a"]), keys(&["b"])]);
}

#[tokio::test]
async fn caches_repeated_loads() {
    let recorder = Arc::new(Recorder::default());
    let loader = Loader::new(RecordingFetch, recorder.clone());

    let first = loader.load("a".to_owned()).await;
    let second = loader.load("a".to_owned()).await;

    assert_eq!(first, value("a"));
    assert_eq!(first, second);
    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test]
async fn results_follow_key_positions() {
    let recorder = Arc::new(Recorder::default());
    let loader = Loader::new(RecordingFetch, recorder.clone());

    let (k1, others, k0, k2) = future::join4(
        loader.load("k1".to_owned()),
        loader.load_many(keys(&["x", "y", "z"])),
        loader.load("k0".to_owned()),
        loader.load("k2".to_owned()),
    )
    .await;

    assert_eq!(k0, value("k0"));
    assert_eq!(k1, value("k1"));
    assert_eq!(k2, value("k2"));
    assert_eq!(others, Ok(vec![value("x"), value("y"), value("z")]));
    assert_eq!(recorder.calls(), vec![keys(&["k1", "x", "y", "z", "k0", "k2"])]);
}

#[tokio::test]
async fn splits_batches_by_max_batch_size() {
    let recorder = Arc::new(Recorder::default());
    let observer = Arc::new(RecordingObserver::default());
    let config = LoaderConfig::default().with_max_batch_size(2).with_observer(observer.clone());
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    let requested = keys(&["k0", "k1", "k2", "k3", "k4"]);
    let results = future::join_all(requested.iter().cloned().map(|key| loader.load(key))).await;

    assert_eq!(results, requested.iter().map(|key| value(key)).collect::<Vec<_>>());
    let expected_chunks = vec![keys(&["k0", "k1"]), keys(&["k2", "k3"]), keys(&["k4"])];
    assert_eq!(*observer.dispatched.lock().unwrap(), expected_chunks);

    let mut calls = recorder.calls();
    calls.sort();
    assert_eq!(calls, expected_chunks);

    let stats = loader.stats().await.unwrap();
    assert_eq!(stats.loads, 3);
    assert_eq!(stats.max_batch_size, 2);
    assert_eq!(stats.min_batch_size, 1);
}

#[tokio::test]
async fn zero_max_batch_size_is_unbounded() {
    let recorder = Arc::new(Recorder::default());
    let config = LoaderConfig::default().with_max_batch_size(0);
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    loader.load_many(keys(&["a", "b", "c"])).await.unwrap();
    assert_eq!(recorder.calls(), vec![keys(&["a", "b", "c"])]);
}

#[tokio::test]
async fn systemic_failure_fails_batch_and_allows_retry() {
    let recorder = Arc::new(Recorder::default());
    recorder.fail.store(true, Ordering::SeqCst);
    let loader = Loader::new(RecordingFetch, recorder.clone());

    let (a, b) = future::join(loader.load("a".to_owned()), loader.load("b".to_owned())).await;
    let expected = LoadError::Batch { message: "backend unavailable".to_owned() };
    assert_eq!(a, Err(expected.clone()));
    assert_eq!(b, Err(expected.clone()));
    assert!(expected.is_systemic());

    recorder.fail.store(false, Ordering::SeqCst);
    loader.clear("a".to_owned()).unwrap();
    assert_eq!(loader.load("a".to_owned()).await, value("a"));
    // Failed keys are not cached even without an explicit clear.
    assert_eq!(loader.load("b".to_owned()).await, value("b"));

    assert_eq!(recorder.calls(), vec![keys(&["a", "b"]), keys(&["a"]), keys(&["b"])]);
    assert_eq!(loader.stats().await.unwrap().batch_failures, 1);
}

#[tokio::test]
async fn length_mismatch_fails_whole_batch() {
    let recorder = Arc::new(Recorder::default());
    recorder.short.store(true, Ordering::SeqCst);
    let loader = Loader::new(RecordingFetch, recorder.clone());

    let results = loader.load_many(keys(&["a", "b"])).await.unwrap();
    let expected = Err(LoadError::LengthMismatch { expected: 2, actual: 1 });
    assert_eq!(results, vec![expected.clone(), expected]);

    recorder.short.store(false, Ordering::SeqCst);
    assert_eq!(loader.load("a".to_owned()).await, value("a"));
    assert_eq!(recorder.calls().len(), 2);
}

#[tokio::test]
async fn key_failure_only_affects_its_caller() {
    let recorder = Arc::new(Recorder { broken_keys: keys(&["bad"]), ..Default::default() });
    let observer = Arc::new(RecordingObserver::default());
    let config = LoaderConfig::default().with_observer(observer.clone());
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    let (good, bad) =
        future::join(loader.load("good".to_owned()), loader.load("bad".to_owned())).await;
    assert_eq!(good, value("good"));
    let failure = LoadError::Key { message: "bad is broken".to_owned() };
    assert!(!failure.is_systemic());
    assert_eq!(bad, Err(failure.clone()));

    // Key failures are memoized like values.
    assert_eq!(loader.load("bad".to_owned()).await, Err(failure));
    assert_eq!(recorder.calls().len(), 1);
    assert_eq!(*observer.completed.lock().unwrap(), vec![(2, 1)]);

    let stats = loader.stats().await.unwrap();
    assert_eq!(stats.items_loaded, 1);
    assert_eq!(stats.key_failures, 1);
}

#[tokio::test]
async fn duplicate_keys_collapse() {
    let recorder = Arc::new(Recorder::default());
    let observer = Arc::new(RecordingObserver::default());
    let config = LoaderConfig::default().with_observer(observer.clone());
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    let results = loader.load_many(keys(&["k", "k", "k2"])).await.unwrap();

    assert_eq!(results, vec![value("k"), value("k"), value("k2")]);
    assert_eq!(recorder.calls(), vec![keys(&["k", "k2"])]);
    assert_eq!(loader.stats().await.unwrap().coalesced, 1);
    assert_eq!(observer.coalesced.load(Ordering::SeqCst), 1);
    assert_eq!(observer.cache_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_cache_refetches_between_steps() {
    let recorder = Arc::new(Recorder::default());
    let config = LoaderConfig::default().without_cache();
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    let (first, second) =
        future::join(loader.load("a".to_owned()), loader.load("a".to_owned())).await;
    assert_eq!(first, value("a"));
    assert_eq!(second, value("a"));
    assert_eq!(loader.load("a".to_owned()).await, value("a"));

    assert_eq!(recorder.calls(), vec![keys(&["a"]), keys(&["a"])]);

    loader.prime("b".to_owned(), "primed".to_owned()).unwrap();
    assert_eq!(loader.load("b".to_owned()).await, value("b"));
}

#[tokio::test]
async fn cache_key_fn_canonicalises_and_rejects_keys() {
    let recorder = Arc::new(Recorder::default());
    let config = LoaderConfig::default().with_cache_key_fn(|key: String| {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            Err("empty key".to_owned())
        } else {
            Ok(key)
        }
    });
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    let (upper, lower) =
        future::join(loader.load(" A ".to_owned()), loader.load("a".to_owned())).await;
    assert_eq!(upper, value("a"));
    assert_eq!(lower, value("a"));

    let invalid = LoadError::InvalidKey { message: "empty key".to_owned() };
    assert_eq!(loader.load("  ".to_owned()).await, Err(invalid.clone()));
    assert_eq!(loader.load_many(keys(&["b", ""])).await, Err(invalid));

    assert_eq!(recorder.calls(), vec![keys(&["a"])]);
}

#[tokio::test]
async fn clear_all_forces_reload() {
    let recorder = Arc::new(Recorder::default());
    let loader = Loader::new(RecordingFetch, recorder.clone());

    loader.load_many(keys(&["a", "b"])).await.unwrap();
    loader.clear_all().unwrap();
    loader.load_many(keys(&["a", "b"])).await.unwrap();

    loader.clear_many(keys(&["b"])).unwrap();
    loader.load_many(keys(&["a", "b"])).await.unwrap();

    assert_eq!(recorder.calls(), vec![keys(&["a", "b"]), keys(&["a", "b"]), keys(&["b"])]);
}

#[tokio::test]
async fn observer_sees_cache_hits() {
    let recorder = Arc::new(Recorder::default());
    let observer = Arc::new(RecordingObserver::default());
    let config = LoaderConfig::default().with_observer(observer.clone());
    let loader = Loader::with_config(RecordingFetch, recorder.clone(), config);

    loader.load("a".to_owned()).await.unwrap();
    loader.load("a".to_owned()).await.unwrap();
    loader.load_many(keys(&["a", "b"])).await.unwrap();

    assert_eq!(observer.cache_hits.load(Ordering::SeqCst), 2);
    assert_eq!(*observer.dispatched.lock().unwrap(), vec![keys(&["a"]), keys(&["b"])]);

    let stats = loader.stats().await.unwrap();
    assert_eq!(stats.load_requests, 3);
    assert_eq!(stats.items_requested, 4);
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.loads, 2);
}
