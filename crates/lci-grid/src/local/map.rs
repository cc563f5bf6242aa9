use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};

use super::{GridState, Listeners};
use crate::{
    error::{GridError, GridResult},
    local::events::GridEventSource,
    raw::{LockOwner, MapListener, RawMap, RawMapEvent, SubscriptionId},
};

/// Upper bound between re-checks while waiting for a lock, so expired leases
/// are noticed without an unlock notification.
const LOCK_RECHECK: Duration = Duration::from_millis(50);

struct Held {
    owner: LockOwner,
    expires: Instant,
}

#[derive(Default)]
struct MapState {
    entries: BTreeMap<String, Value>,
    locks: HashMap<String, Held>,
}

impl MapState {
    fn try_acquire(&mut self, key: &str, owner: &LockOwner, lease: Duration) -> bool {
        let now = Instant::now();
        if let Some(held) = self.locks.get(key) {
            if held.expires > now && &held.owner != owner {
                return false;
            }
        }
        self.locks.insert(
            key.to_string(),
            Held {
                owner: owner.clone(),
                expires: instant_after(now, lease),
            },
        );
        true
    }
}

/// `now + d`, saturating at a far-off instant instead of overflowing.
fn instant_after(now: Instant, d: Duration) -> Instant {
    now.checked_add(d)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

pub(crate) struct LocalMap {
    name: String,
    state: Arc<GridState>,
    inner: Mutex<MapState>,
    unlocked: Notify,
    listeners: Listeners<MapListener>,
}

impl LocalMap {
    pub(crate) fn new(name: &str, state: Arc<GridState>) -> Self {
        Self {
            name: name.to_string(),
            state,
            inner: Mutex::new(MapState::default()),
            unlocked: Notify::new(),
            listeners: Listeners::default(),
        }
    }

    fn emit(&self, event: RawMapEvent) {
        self.state.record(|| GridEventSource::Map {
            name: self.name.clone(),
            event: event.clone(),
        });
        for listener in self.listeners.snapshot() {
            listener(&event);
        }
    }

    fn store(&self, key: String, value: Value) -> Option<Value> {
        let old = self.inner.lock().entries.insert(key.clone(), value.clone());
        let event = match &old {
            Some(old) => RawMapEvent::Updated {
                key,
                old: old.clone(),
                value,
            },
            None => RawMapEvent::Added { key, value },
        };
        self.emit(event);
        old
    }
}

#[async_trait]
impl RawMap for LocalMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn get_all(&self, keys: Vec<String>) -> GridResult<Vec<(String, Value)>> {
        self.state.ensure_active()?;
        let inner = self.inner.lock();
        Ok(keys
            .into_iter()
            .filter_map(|k| inner.entries.get(&k).cloned().map(|v| (k, v)))
            .collect())
    }

    async fn put(&self, key: String, value: Value) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        Ok(self.store(key, value))
    }

    async fn put_if_absent(&self, key: String, value: Value) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.entries.get(&key) {
                return Ok(Some(existing.clone()));
            }
            inner.entries.insert(key.clone(), value.clone());
        }
        self.emit(RawMapEvent::Added { key, value });
        Ok(None)
    }

    async fn remove(&self, key: &str) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        let old = self.inner.lock().entries.remove(key);
        if let Some(old) = &old {
            self.emit(RawMapEvent::Removed {
                key: key.to_string(),
                old: old.clone(),
            });
        }
        Ok(old)
    }

    async fn keys(&self) -> GridResult<Vec<String>> {
        self.state.ensure_active()?;
        Ok(self.inner.lock().entries.keys().cloned().collect())
    }

    async fn entries(&self) -> GridResult<Vec<(String, Value)>> {
        self.state.ensure_active()?;
        Ok(self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn len(&self) -> GridResult<usize> {
        self.state.ensure_active()?;
        Ok(self.inner.lock().entries.len())
    }

    async fn clear(&self) -> GridResult<()> {
        self.state.ensure_active()?;
        self.inner.lock().entries.clear();
        self.emit(RawMapEvent::Cleared);
        Ok(())
    }

    async fn lock(
        &self,
        key: &str,
        owner: &LockOwner,
        lease: Duration,
        wait: Duration,
    ) -> GridResult<()> {
        let deadline = instant_after(Instant::now(), wait);
        loop {
            self.state.ensure_active()?;

            let unlocked = self.unlocked.notified();
            tokio::pin!(unlocked);
            unlocked.as_mut().enable();

            if self.inner.lock().try_acquire(key, owner, lease) {
                trace!(map = %self.name, key, "lock acquired");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(map = %self.name, key, "lock wait timed out");
                return Err(GridError::LockTimeout {
                    map: self.name.clone(),
                    key: key.to_string(),
                });
            }
            let wake = deadline.min(now + LOCK_RECHECK);
            let _ = tokio::time::timeout_at(wake, unlocked).await;
        }
    }

    async fn try_lock(&self, key: &str, owner: &LockOwner, lease: Duration) -> GridResult<bool> {
        self.state.ensure_active()?;
        Ok(self.inner.lock().try_acquire(key, owner, lease))
    }

    async fn unlock(&self, key: &str, owner: &LockOwner) -> GridResult<()> {
        self.state.ensure_active()?;
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let holder = inner
                .locks
                .get(key)
                .map(|held| (&held.owner == owner, held.expires > now));
            match holder {
                Some((false, true)) => {
                    return Err(GridError::NotLockOwner {
                        map: self.name.clone(),
                        key: key.to_string(),
                    });
                }
                Some(_) => {
                    inner.locks.remove(key);
                }
                None => {
                    debug!(map = %self.name, key, "unlock of a free key; lease already expired");
                    return Ok(());
                }
            }
        }
        trace!(map = %self.name, key, "lock released");
        self.unlocked.notify_waiters();
        Ok(())
    }

    async fn is_locked(&self, key: &str) -> GridResult<bool> {
        self.state.ensure_active()?;
        let now = Instant::now();
        Ok(self
            .inner
            .lock()
            .locks
            .get(key)
            .is_some_and(|held| held.expires > now))
    }

    async fn add_listener(&self, listener: MapListener) -> GridResult<SubscriptionId> {
        self.state.ensure_active()?;
        Ok(self.listeners.add(listener))
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.state.warn_if_inactive(&self.name, id);
        self.listeners.remove(id)
    }
}
