//! Single-process provider.
//!
//! Backs tests and single-node deployments, and is the state a grid host serves
//! to remote members.
mod events;
pub use events::{EventBatch, EventLog, GridEvent, GridEventSource};

mod map;
mod queue;
mod topic;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    error::{GridError, GridResult},
    provider::{DistributedDataProvider, LockSettings},
    raw::{RawMap, RawQueue, RawTopic, SubscriptionId},
};
use map::LocalMap;
use queue::LocalQueue;
use topic::LocalTopic;

/// Settings of a [`LocalProvider`].
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// Address this member reports for itself.
    pub address: String,
    pub locks: LockSettings,
    /// Size of the event log; `0` disables it (no remote members can listen).
    pub event_log_capacity: usize,
    /// How long a remote member stays listed after its last heartbeat.
    pub member_ttl: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            address: "local".to_string(),
            locks: LockSettings::default(),
            event_log_capacity: 0,
            member_ttl: Duration::from_secs(30),
        }
    }
}

/// State shared by every structure of one provider.
pub(crate) struct GridState {
    active: AtomicBool,
    log: Option<Arc<EventLog>>,
}

impl GridState {
    pub(crate) fn ensure_active(&self) -> GridResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GridError::NotActive)
        }
    }

    pub(crate) fn warn_if_inactive(&self, name: &str, id: SubscriptionId) {
        if !self.active.load(Ordering::Acquire) {
            warn!(structure = name, subscription = %id, "grid inactive while removing listener");
        }
    }

    pub(crate) fn record(&self, source: impl FnOnce() -> GridEventSource) {
        if let Some(log) = &self.log {
            log.append(source());
        }
    }
}

/// Registered listeners of one structure.
pub(crate) struct Listeners<L> {
    entries: Mutex<Vec<(SubscriptionId, L)>>,
}

impl<L> Default for Listeners<L> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<L: Clone> Listeners<L> {
    pub(crate) fn add(&self, listener: L) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    /// Listeners are invoked on a copy so callbacks may (un)register freely.
    pub(crate) fn snapshot(&self) -> Vec<L> {
        self.entries.lock().iter().map(|(_, l)| l.clone()).collect()
    }
}

struct Inner {
    config: LocalConfig,
    state: Arc<GridState>,
    queues: Mutex<HashMap<String, Arc<LocalQueue>>>,
    maps: Mutex<HashMap<String, Arc<LocalMap>>>,
    topics: Mutex<HashMap<String, Arc<LocalTopic>>>,
    members: Mutex<HashMap<String, Instant>>,
}

/// In-memory [`DistributedDataProvider`].
#[derive(Clone)]
pub struct LocalProvider {
    inner: Arc<Inner>,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

impl LocalProvider {
    pub fn new(config: LocalConfig) -> Self {
        let log = (config.event_log_capacity > 0)
            .then(|| Arc::new(EventLog::new(config.event_log_capacity)));
        Self {
            inner: Arc::new(Inner {
                state: Arc::new(GridState {
                    active: AtomicBool::new(true),
                    log,
                }),
                config,
                queues: Mutex::new(HashMap::new()),
                maps: Mutex::new(HashMap::new()),
                topics: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Event log shipped to remote members, if enabled.
    pub fn event_log(&self) -> Option<Arc<EventLog>> {
        self.inner.state.log.clone()
    }

    /// Record a heartbeat from a remote member.
    pub fn touch_member(&self, address: &str) {
        self.inner
            .members
            .lock()
            .insert(address.to_string(), Instant::now());
    }

    /// Stop serving; every subsequent operation fails with [`GridError::NotActive`].
    pub fn shutdown(&self) {
        if self.inner.state.active.swap(false, Ordering::AcqRel) {
            info!(address = %self.inner.config.address, "local grid shut down");
        }
    }
}

#[async_trait]
impl DistributedDataProvider for LocalProvider {
    fn raw_queue(&self, name: &str) -> Arc<dyn RawQueue> {
        self.inner
            .queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalQueue::new(name, self.inner.state.clone())))
            .clone()
    }

    fn raw_map(&self, name: &str) -> Arc<dyn RawMap> {
        self.inner
            .maps
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalMap::new(name, self.inner.state.clone())))
            .clone()
    }

    fn raw_topic(&self, name: &str) -> Arc<dyn RawTopic> {
        self.inner
            .topics
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalTopic::new(name, self.inner.state.clone())))
            .clone()
    }

    fn lock_settings(&self) -> LockSettings {
        self.inner.config.locks
    }

    fn is_active(&self) -> bool {
        self.inner.state.active.load(Ordering::Acquire)
    }

    fn local_member_address(&self) -> String {
        self.inner.config.address.clone()
    }

    async fn member_addresses(&self) -> GridResult<Vec<String>> {
        self.inner.state.ensure_active()?;
        let ttl = self.inner.config.member_ttl;
        let now = Instant::now();

        let mut members = self.inner.members.lock();
        members.retain(|_, seen| now.duration_since(*seen) <= ttl);

        let mut out: Vec<String> = members.keys().cloned().collect();
        out.push(self.inner.config.address.clone());
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn no_data_member_available(&self) -> bool {
        !self.is_active()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{DataProviderExt, MapEntryEvent, QueueItemEvent};

    #[tokio::test]
    async fn queue_priority_head_and_tail_ordering() {
        let grid = LocalProvider::default();
        let q = grid.queue::<String>("q");

        q.offer(&"p5-a".to_string(), 5).await.unwrap();
        q.offer(&"p1".to_string(), 1).await.unwrap();
        q.offer(&"p5-b".to_string(), 5).await.unwrap();
        q.add(&"tail".to_string()).await.unwrap();
        q.offer(&"p3".to_string(), 3).await.unwrap();
        q.add_first(&"head".to_string()).await.unwrap();

        let order = q.snapshot().await.unwrap();
        assert_eq!(order, vec!["head", "p1", "p3", "p5-a", "p5-b", "tail"]);

        assert_eq!(q.peek().await.unwrap().as_deref(), Some("head"));
        assert_eq!(q.poll().await.unwrap().as_deref(), Some("head"));
        assert_eq!(q.size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn queue_remove_all_and_listeners() {
        let grid = LocalProvider::default();
        let q = grid.queue::<u32>("nums");
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let sub = {
            let (added, removed) = (added.clone(), removed.clone());
            q.add_item_listener(move |ev| match ev {
                QueueItemEvent::Added(_) => {
                    added.fetch_add(1, Ordering::SeqCst);
                }
                QueueItemEvent::Removed(_) => {
                    removed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap()
        };

        q.add_all(&[1, 2, 3, 2]).await.unwrap();
        assert_eq!(q.remove_all(&[2, 9]).await.unwrap(), 2);
        assert_eq!(q.snapshot().await.unwrap(), vec![1, 3]);
        assert_eq!(added.load(Ordering::SeqCst), 4);
        assert_eq!(removed.load(Ordering::SeqCst), 2);

        assert!(q.remove_listener(sub).await);
        q.add(&7).await.unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_polls_never_share_an_item() {
        let grid = LocalProvider::default();
        let q = grid.queue::<u32>("race");
        q.add_all(&(0..200).collect::<Vec<_>>()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let q = q.clone();
            tasks.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(n) = q.poll().await.unwrap() {
                    got.push(n);
                }
                got
            }));
        }
        let mut all = Vec::new();
        for t in tasks {
            all.extend(t.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn map_operations_and_entry_events() {
        let grid = LocalProvider::default();
        let m = grid.map::<String, u32>("m");
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            m.add_entry_listener(move |ev| events.lock().push(ev))
                .await
                .unwrap();
        }

        assert_eq!(m.put("a".into(), &1).await.unwrap(), None);
        assert_eq!(m.put("a".into(), &2).await.unwrap(), Some(1));
        assert_eq!(m.put_if_absent("a".into(), &9).await.unwrap(), Some(2));
        m.put("b".into(), &3).await.unwrap();

        let all = m.get_all(&["a".into(), "zz".into()]).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["a"], 2);

        assert_eq!(m.key_set().await.unwrap().len(), 2);
        assert_eq!(m.values().await.unwrap(), vec![2, 3]);
        let copy = m.local_copy().await.unwrap();
        assert_eq!(m.remove(&"b".into()).await.unwrap(), Some(3));
        assert_eq!(copy.len(), 2);
        assert_eq!(m.len().await.unwrap(), 1);

        let events = events.lock();
        assert!(matches!(events[0], MapEntryEvent::Added { value: 1, .. }));
        assert!(matches!(events[1], MapEntryEvent::Updated { old: 1, value: 2, .. }));
        assert!(matches!(events.last(), Some(MapEntryEvent::Removed { old: 3, .. })));
    }

    #[tokio::test]
    async fn lock_excludes_other_owners_until_unlock() {
        let grid = LocalProvider::default();
        let m = grid.map::<String, u32>("locks");
        let key = "k".to_string();

        let guard = m.lock(&key).await.unwrap();
        assert!(m.is_locked(&key).await.unwrap());
        assert!(m.try_lock(&key).await.unwrap().is_none());

        let contender = {
            let m = m.clone();
            let key = key.clone();
            tokio::spawn(async move { m.lock(&key).await.map(|_g| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        guard.unlock().await.unwrap();
        contender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lock_wait_times_out() {
        let grid = LocalProvider::default();
        let m = grid.map::<String, u32>("locks");
        let key = "k".to_string();
        let _held = m.lock(&key).await.unwrap();

        let err = m
            .lock_with_wait(&key, Duration::from_millis(30))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GridError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn expired_lease_frees_the_key() {
        let grid = LocalProvider::new(LocalConfig {
            locks: LockSettings {
                lease: Duration::from_millis(100),
                wait: Duration::from_secs(1),
            },
            ..LocalConfig::default()
        });
        let m = grid.map::<String, u32>("lease");
        let key = "k".to_string();

        let stale = m.lock(&key).await.unwrap();
        let fresh = m.lock(&key).await.unwrap();
        assert!(m.is_locked(&key).await.unwrap());

        let err = stale.unlock().await.unwrap_err();
        assert!(matches!(err, GridError::NotLockOwner { .. }));
        fresh.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_guard_releases_lock() {
        let grid = LocalProvider::default();
        let m = grid.map::<String, u32>("drop");
        let key = "k".to_string();

        drop(m.lock(&key).await.unwrap());
        let again = m.lock_with_wait(&key, Duration::from_secs(1)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn topic_fans_out_without_replay() {
        let grid = LocalProvider::default();
        let t = grid.topic::<String>("t");
        t.publish(&"before".to_string()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            t.add_message_listener(move |m| seen.lock().push(m))
                .await
                .unwrap();
        }
        t.publish(&"after".to_string()).await.unwrap();
        assert_eq!(*seen.lock(), vec!["after".to_string(), "after".to_string()]);
    }

    #[tokio::test]
    async fn inactive_grid_fails_fast_and_tolerates_listener_removal() {
        let grid = LocalProvider::default();
        let q = grid.queue::<u32>("q");
        let sub = q.add_item_listener(|_| {}).await.unwrap();

        grid.shutdown();
        assert!(!grid.is_active());
        assert!(grid.no_data_member_available().await);
        assert!(q.poll().await.unwrap_err().is_not_active());
        assert!(grid.member_addresses().await.unwrap_err().is_not_active());
        assert!(q.remove_listener(sub).await);
    }

    #[tokio::test]
    async fn members_expire_after_ttl() {
        let grid = LocalProvider::new(LocalConfig {
            address: "host:1".into(),
            member_ttl: Duration::from_millis(30),
            ..LocalConfig::default()
        });
        grid.touch_member("peer:2");
        assert_eq!(
            grid.member_addresses().await.unwrap(),
            vec!["host:1".to_string(), "peer:2".to_string()]
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(grid.member_addresses().await.unwrap(), vec!["host:1".to_string()]);
    }

    #[tokio::test]
    async fn event_log_records_every_structure() {
        let grid = LocalProvider::new(LocalConfig {
            event_log_capacity: 16,
            ..LocalConfig::default()
        });
        grid.queue::<u32>("q").add(&1).await.unwrap();
        grid.map::<String, u32>("m").put("k".into(), &1).await.unwrap();
        grid.topic::<u32>("t").publish(&1).await.unwrap();

        let log = grid.event_log().unwrap();
        let batch = log.read_after(0, 10);
        assert_eq!(batch.events.len(), 3);
        assert!(matches!(batch.events[0].source, GridEventSource::Queue { .. }));
        assert!(matches!(batch.events[1].source, GridEventSource::Map { .. }));
        assert!(matches!(batch.events[2].source, GridEventSource::Topic { .. }));
    }
}
