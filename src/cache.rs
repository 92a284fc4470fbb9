use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Storage for resolved loader entries.
///
/// Only settled results live here. Keys whose fetch is still in flight are tracked by the worker
/// itself, so a cache implementation never sees a half-finished entry.
pub trait Cache {
    type K;
    type V;

    /// Returns the entry for each requested key, in order.
    fn get(&self, keys: &[Self::K]) -> Vec<Option<&Self::V>>;

    fn contains(&self, key: &Self::K) -> bool;

    fn insert(&mut self, key: Self::K, value: Self::V);
    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I);

    fn remove(&mut self, keys: &[Self::K]);
    fn flush(&mut self);
}

impl<K, V, S: BuildHasher> Cache for HashMap<K, V, S>
where
    K: Eq + Hash,
{
    type K = K;
    type V = V;

    fn get(&self, keys: &[Self::K]) -> Vec<Option<&Self::V>> {
        keys.iter().map(|k| HashMap::get(self, k)).collect::<Vec<_>>()
    }

    fn contains(&self, key: &Self::K) -> bool {
        self.contains_key(key)
    }

    fn insert(&mut self, key: Self::K, value: Self::V) {
        HashMap::insert(self, key, value);
    }

    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I) {
        for (key, value) in key_vals.into_iter() {
            HashMap::insert(self, key, value);
        }
    }

    fn remove(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            HashMap::remove(self, key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}
