use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    MapKey, Payload,
    error::GridResult,
    payload::{decode, encode, parse_key},
    provider::LockSettings,
    raw::{LockOwner, RawMap, RawMapEvent, SubscriptionId},
};

/// Entry event delivered to map listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum MapEntryEvent<K, V> {
    Added { key: K, value: V },
    Updated { key: K, old: V, value: V },
    Removed { key: K, old: V },
    Cleared,
}

/// Typed view over a [`RawMap`].
pub struct DistributedMap<K, V> {
    raw: Arc<dyn RawMap>,
    locks: LockSettings,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for DistributedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            locks: self.locks,
            _kv: PhantomData,
        }
    }
}

impl<K: MapKey, V: Payload> DistributedMap<K, V> {
    pub fn new(raw: Arc<dyn RawMap>, locks: LockSettings) -> Self {
        Self {
            raw,
            locks,
            _kv: PhantomData,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub async fn get(&self, key: &K) -> GridResult<Option<V>> {
        self.raw
            .get(&key.to_string())
            .await?
            .map(decode)
            .transpose()
    }

    /// Values for the given keys; absent keys are missing from the result.
    pub async fn get_all(&self, keys: &[K]) -> GridResult<BTreeMap<K, V>> {
        let raw_keys = keys.iter().map(|k| k.to_string()).collect();
        self.raw
            .get_all(raw_keys)
            .await?
            .into_iter()
            .map(|(k, v)| Ok((parse_key(&k)?, decode(v)?)))
            .collect()
    }

    /// Store `value`, returning the previous one.
    pub async fn put(&self, key: K, value: &V) -> GridResult<Option<V>> {
        self.raw
            .put(key.to_string(), encode(value)?)
            .await?
            .map(decode)
            .transpose()
    }

    /// Store `value` only if `key` is absent; returns the existing value otherwise.
    pub async fn put_if_absent(&self, key: K, value: &V) -> GridResult<Option<V>> {
        self.raw
            .put_if_absent(key.to_string(), encode(value)?)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn remove(&self, key: &K) -> GridResult<Option<V>> {
        self.raw
            .remove(&key.to_string())
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn contains_key(&self, key: &K) -> GridResult<bool> {
        Ok(self.raw.get(&key.to_string()).await?.is_some())
    }

    pub async fn values(&self) -> GridResult<Vec<V>> {
        self.raw
            .entries()
            .await?
            .into_iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    pub async fn key_set(&self) -> GridResult<BTreeSet<K>> {
        self.raw
            .keys()
            .await?
            .iter()
            .map(|k| parse_key(k))
            .collect()
    }

    pub async fn entry_set(&self) -> GridResult<Vec<(K, V)>> {
        self.raw
            .entries()
            .await?
            .into_iter()
            .map(|(k, v)| Ok((parse_key(&k)?, decode(v)?)))
            .collect()
    }

    /// Point-in-time local copy, detached from the grid.
    pub async fn local_copy(&self) -> GridResult<BTreeMap<K, V>> {
        Ok(self.entry_set().await?.into_iter().collect())
    }

    pub async fn len(&self) -> GridResult<usize> {
        self.raw.len().await
    }

    pub async fn is_empty(&self) -> GridResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> GridResult<()> {
        self.raw.clear().await
    }

    /// Lock `key`, waiting up to the provider's configured wait.
    pub async fn lock(&self, key: &K) -> GridResult<KeyLockGuard> {
        self.lock_with_wait(key, self.locks.wait).await
    }

    pub async fn lock_with_wait(&self, key: &K, wait: Duration) -> GridResult<KeyLockGuard> {
        let key = key.to_string();
        let owner = LockOwner::unique();
        self.raw.lock(&key, &owner, self.locks.lease, wait).await?;
        Ok(KeyLockGuard::new(Arc::clone(&self.raw), key, owner))
    }

    /// Lock `key` if it is free right now.
    pub async fn try_lock(&self, key: &K) -> GridResult<Option<KeyLockGuard>> {
        let key = key.to_string();
        let owner = LockOwner::unique();
        if self.raw.try_lock(&key, &owner, self.locks.lease).await? {
            Ok(Some(KeyLockGuard::new(Arc::clone(&self.raw), key, owner)))
        } else {
            Ok(None)
        }
    }

    pub async fn is_locked(&self, key: &K) -> GridResult<bool> {
        self.raw.is_locked(&key.to_string()).await
    }

    /// Register an entry listener. Undecodable events are logged and skipped.
    pub async fn add_entry_listener<F>(&self, listener: F) -> GridResult<SubscriptionId>
    where
        F: Fn(MapEntryEvent<K, V>) + Send + Sync + 'static,
    {
        let map = self.name().to_string();
        self.raw
            .add_listener(Arc::new(move |event: &RawMapEvent| {
                match typed_event::<K, V>(event) {
                    Ok(ev) => listener(ev),
                    Err(e) => warn!(map = %map, error = %e, "dropping undecodable map event"),
                }
            }))
            .await
    }

    pub async fn remove_entry_listener(&self, id: SubscriptionId) -> bool {
        self.raw.remove_listener(id).await
    }
}

fn typed_event<K: MapKey, V: Payload>(event: &RawMapEvent) -> GridResult<MapEntryEvent<K, V>> {
    Ok(match event {
        RawMapEvent::Added { key, value } => MapEntryEvent::Added {
            key: parse_key(key)?,
            value: decode(value.clone())?,
        },
        RawMapEvent::Updated { key, old, value } => MapEntryEvent::Updated {
            key: parse_key(key)?,
            old: decode(old.clone())?,
            value: decode(value.clone())?,
        },
        RawMapEvent::Removed { key, old } => MapEntryEvent::Removed {
            key: parse_key(key)?,
            old: decode(old.clone())?,
        },
        RawMapEvent::Cleared => MapEntryEvent::Cleared,
    })
}

/// Scoped hold on one map key.
///
/// Release with [`KeyLockGuard::unlock`]. A guard dropped without it (early
/// return, `?`, panic) releases the lock from a spawned task; if no runtime is
/// available the lease expiry frees the key.
#[must_use = "dropping the guard releases the lock"]
pub struct KeyLockGuard {
    raw: Arc<dyn RawMap>,
    key: String,
    owner: LockOwner,
    released: bool,
}

impl KeyLockGuard {
    fn new(raw: Arc<dyn RawMap>, key: String, owner: LockOwner) -> Self {
        Self {
            raw,
            key,
            owner,
            released: false,
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn unlock(mut self) -> GridResult<()> {
        self.released = true;
        self.raw.unlock(&self.key, &self.owner).await
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let raw = Arc::clone(&self.raw);
        let key = std::mem::take(&mut self.key);
        let owner = self.owner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = raw.unlock(&key, &owner).await {
                        warn!(map = raw.name(), key = %key, error = %e, "deferred unlock failed");
                    } else {
                        debug!(map = raw.name(), key = %key, "lock released on drop");
                    }
                });
            }
            Err(_) => {
                warn!(map = raw.name(), key = %key, "no runtime to release lock; waiting for lease expiry");
            }
        }
    }
}
