//! Single-flight memoization.
//!
//! A [`SingleFlight`] maps a key to one shared future. The first caller for a
//! key inserts the future while holding the lock (before any `.await`), so
//! every later caller attaches to the same in-flight work and observes the
//! same result, success or failure, for the rest of the process.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// Keyed table of shared in-flight (or completed) futures.
pub struct SingleFlight<K, V, E> {
    entries: Mutex<HashMap<K, SharedResult<V, E>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, E> std::fmt::Debug for SingleFlight<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` for `key` unless another caller already did.
    ///
    /// `start` is only invoked by the first caller for a key.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries.lock();
            entries
                .entry(key)
                .or_insert_with(|| start().boxed().shared())
                .clone()
        };
        shared.await
    }

    /// Number of keys that have been started.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been started yet.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
