//! Lazily initialised per-key cache with single-writer discipline.
//!
//! Built only on [`DistributedMap`]: every write path holds the key lock, so two
//! writers of one key never interleave and the second observes the first's result.
use tracing::{debug, trace};

use crate::{DistributedMap, MapKey, Payload, error::GridResult};

/// Creates values for keys that have none yet.
pub trait CacheFactory<K, V>: Send + Sync {
    /// Fresh value stored on first write access.
    fn create_for(&self, key: &K) -> V;

    /// Value returned to read-only callers when nothing is stored.
    fn empty_value_for(&self, key: &K) -> V;
}

/// Hook run by [`CacheHandler::remove_and_clear`].
pub trait CacheEntry {
    /// Release node-local resources held by the entry.
    fn release(&mut self) {}
}

pub struct CacheHandler<K, V, F> {
    map: DistributedMap<K, V>,
    factory: F,
}

impl<K, V, F> CacheHandler<K, V, F>
where
    K: MapKey,
    V: Payload + CacheEntry,
    F: CacheFactory<K, V>,
{
    pub fn new(map: DistributedMap<K, V>, factory: F) -> Self {
        Self { map, factory }
    }

    #[inline]
    pub fn map(&self) -> &DistributedMap<K, V> {
        &self.map
    }

    /// Best-effort snapshot of every present value.
    ///
    /// Lists keys and fetches each value on its own; entries deleted in between
    /// are skipped.
    pub async fn get_all_caches(&self) -> GridResult<Vec<V>> {
        let keys = self.map.key_set().await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.map.get(&key).await? {
                out.push(value);
            }
        }
        Ok(out)
    }

    pub async fn get_cache_for(&self, key: &K) -> GridResult<Option<V>> {
        self.map.get(key).await
    }

    /// Like [`CacheHandler::get_cache_for`] but yields the empty value when absent.
    pub async fn get_read_cache_for(&self, key: &K) -> GridResult<V> {
        Ok(match self.map.get(key).await? {
            Some(v) => v,
            None => self.factory.empty_value_for(key),
        })
    }

    /// Existing entry, or one created under the key lock.
    ///
    /// The result is re-read after creation so the caller sees what the map
    /// holds, not a local copy.
    pub async fn get_transient_write_cache_for(&self, key: &K) -> GridResult<V> {
        if let Some(v) = self.map.get(key).await? {
            return Ok(v);
        }

        let guard = self.map.lock(key).await?;
        let created = self.create_if_absent(key).await;
        guard.unlock().await?;
        let created = created?;

        Ok(self.map.get(key).await?.unwrap_or(created))
    }

    async fn create_if_absent(&self, key: &K) -> GridResult<V> {
        if let Some(existing) = self.map.get(key).await? {
            trace!(map = self.map.name(), key = %key, "entry created concurrently");
            return Ok(existing);
        }
        let fresh = self.factory.create_for(key);
        self.map.put(key.clone(), &fresh).await?;
        debug!(map = self.map.name(), key = %key, "cache entry created");
        Ok(fresh)
    }

    /// Apply `write` to the current value (created if absent) under the key lock.
    pub async fn perform_cache_write<W>(&self, key: &K, write: W) -> GridResult<V>
    where
        W: FnOnce(V) -> V,
    {
        let guard = self.map.lock(key).await?;
        let written = self.write_locked(key, write, true).await;
        guard.unlock().await?;
        written?;
        self.reread(key).await
    }

    /// Like [`CacheHandler::perform_cache_write`], but does nothing if the key has
    /// no entry yet.
    pub async fn perform_cache_write_if_present<W>(&self, key: &K, write: W) -> GridResult<Option<V>>
    where
        W: FnOnce(V) -> V,
    {
        let guard = self.map.lock(key).await?;
        let written = self.write_locked(key, write, false).await;
        guard.unlock().await?;
        if written? {
            self.reread(key).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Returns whether a value was written.
    async fn write_locked<W>(&self, key: &K, write: W, create: bool) -> GridResult<bool>
    where
        W: FnOnce(V) -> V,
    {
        let current = match self.map.get(key).await? {
            Some(v) => v,
            None if create => self.factory.create_for(key),
            None => return Ok(false),
        };
        self.map.put(key.clone(), &write(current)).await?;
        Ok(true)
    }

    async fn reread(&self, key: &K) -> GridResult<V> {
        Ok(match self.map.get(key).await? {
            Some(v) => v,
            None => self.factory.empty_value_for(key),
        })
    }

    pub async fn remove(&self, key: &K) -> GridResult<Option<V>> {
        self.map.remove(key).await
    }

    /// Remove the entry and run its release hook.
    ///
    /// Lossy under concurrent access: a writer racing with this call may
    /// re-create the entry. Use [`CacheHandler::remove`] when that matters.
    pub async fn remove_and_clear(&self, key: &K) -> GridResult<()> {
        if let Some(mut value) = self.map.remove(key).await? {
            value.release();
        }
        Ok(())
    }

    /// Wipe the whole cache. Administrative resets and tests only.
    pub async fn clear(&self) -> GridResult<()> {
        self.map.clear().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{DataProviderExt, LocalProvider};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Tokens(Vec<String>);

    impl CacheEntry for Tokens {
        fn release(&mut self) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl CacheFactory<String, Tokens> for Arc<CountingFactory> {
        fn create_for(&self, _key: &String) -> Tokens {
            self.created.fetch_add(1, Ordering::SeqCst);
            Tokens::default()
        }

        fn empty_value_for(&self, _key: &String) -> Tokens {
            Tokens(vec!["<empty>".into()])
        }
    }

    fn handler(grid: &LocalProvider) -> (CacheHandler<String, Tokens, Arc<CountingFactory>>, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (CacheHandler::new(grid.map("cache"), factory.clone()), factory)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_lose_updates() {
        let grid = LocalProvider::default();
        let (cache, _) = handler(&grid);
        let cache = Arc::new(cache);
        let key = "k".to_string();

        let mut tasks = Vec::new();
        for n in 0..16 {
            let cache = cache.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .perform_cache_write(&key, |mut t| {
                        t.0.push(format!("token-{n}"));
                        t
                    })
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut tokens = cache.get_cache_for(&key).await.unwrap().unwrap().0;
        tokens.sort();
        let mut expected: Vec<String> = (0..16).map(|n| format!("token-{n}")).collect();
        expected.sort();
        assert_eq!(tokens, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transient_write_cache_creates_once() {
        let grid = LocalProvider::default();
        let (cache, factory) = handler(&grid);
        let cache = Arc::new(cache);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.get_transient_write_cache_for(&"k".to_string()).await.unwrap()
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), Tokens::default());
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_cache_uses_empty_value_and_does_not_create() {
        let grid = LocalProvider::default();
        let (cache, factory) = handler(&grid);
        let key = "missing".to_string();

        assert!(cache.get_cache_for(&key).await.unwrap().is_none());
        assert_eq!(cache.get_read_cache_for(&key).await.unwrap().0, vec!["<empty>"]);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert!(cache.get_all_caches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_if_present_is_noop_for_missing_key() {
        let grid = LocalProvider::default();
        let (cache, factory) = handler(&grid);
        let key = "k".to_string();

        let out = cache
            .perform_cache_write_if_present(&key, |mut t| {
                t.0.push("x".into());
                t
            })
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(cache.get_cache_for(&key).await.unwrap().is_none());
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        cache.get_transient_write_cache_for(&key).await.unwrap();
        let out = cache
            .perform_cache_write_if_present(&key, |mut t| {
                t.0.push("x".into());
                t
            })
            .await
            .unwrap();
        assert_eq!(out, Some(Tokens(vec!["x".into()])));
    }

    #[tokio::test]
    async fn remove_and_clear_runs_release_hook() {
        let grid = LocalProvider::default();
        let (cache, _) = handler(&grid);
        let key = "k".to_string();
        cache.get_transient_write_cache_for(&key).await.unwrap();
        cache
            .perform_cache_write(&"other".to_string(), |t| t)
            .await
            .unwrap();
        assert_eq!(cache.get_all_caches().await.unwrap().len(), 2);

        let before = RELEASED.load(Ordering::SeqCst);
        cache.remove_and_clear(&key).await.unwrap();
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
        cache.remove_and_clear(&key).await.unwrap();
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);

        cache.clear().await.unwrap();
        assert!(cache.get_all_caches().await.unwrap().is_empty());
    }
}
