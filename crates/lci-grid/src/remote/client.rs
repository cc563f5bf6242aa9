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
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    server::GRID_RPC_PATH,
    wire::{GridRequest, GridResponse, error_from_wire},
};
use crate::{
    error::{GridError, GridResult},
    local::{GridEvent, GridEventSource},
    provider::{DistributedDataProvider, LockSettings},
    raw::{
        LockOwner, MapListener, QueueListener, QueuePosition, RawMap, RawQueue, RawTopic,
        SubscriptionId, TopicListener,
    },
};

/// Settings of a [`RemoteProvider`].
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Base URL of the grid host, e.g. `http://grid-host:7070`.
    pub url: String,
    /// Address this member reports in heartbeats.
    pub address: String,
    pub locks: LockSettings,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Long-poll duration of one event request.
    pub event_wait: Duration,
    pub event_batch: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:7070".to_string(),
            address: "member".to_string(),
            locks: LockSettings::default(),
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            event_wait: Duration::from_secs(10),
            event_batch: 256,
        }
    }
}

#[derive(Default)]
struct ListenerTable {
    queues: HashMap<String, Vec<(SubscriptionId, QueueListener)>>,
    maps: HashMap<String, Vec<(SubscriptionId, MapListener)>>,
    topics: HashMap<String, Vec<(SubscriptionId, TopicListener)>>,
}

fn remove_from<L>(table: &mut HashMap<String, Vec<(SubscriptionId, L)>>, name: &str, id: SubscriptionId) -> bool {
    let Some(entries) = table.get_mut(name) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|(sid, _)| *sid != id);
    entries.len() != before
}

fn listeners_of<L: Clone>(table: &HashMap<String, Vec<(SubscriptionId, L)>>, name: &str) -> Vec<L> {
    table
        .get(name)
        .map(|v| v.iter().map(|(_, l)| l.clone()).collect())
        .unwrap_or_default()
}

struct Shared {
    http: reqwest::Client,
    endpoint: String,
    config: RemoteConfig,
    active: AtomicBool,
    reachable: AtomicBool,
    members: Mutex<Vec<String>>,
    listeners: Mutex<ListenerTable>,
    cancel: CancellationToken,
}

impl Shared {
    async fn call(&self, request: GridRequest) -> GridResult<GridResponse> {
        self.call_with_timeout(request, self.config.request_timeout).await
    }

    async fn call_with_timeout(
        &self,
        request: GridRequest,
        timeout: Duration,
    ) -> GridResult<GridResponse> {
        if !self.active.load(Ordering::Acquire) {
            return Err(GridError::NotActive);
        }
        let sent = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&request)
            .send()
            .await;
        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                self.mark_reachable(false);
                return Err(GridError::Transport(e.to_string()));
            }
        };
        let body: GridResponse = match response.error_for_status() {
            Ok(r) => r
                .json()
                .await
                .map_err(|e| GridError::Transport(e.to_string()))?,
            Err(e) => return Err(GridError::Transport(e.to_string())),
        };
        self.mark_reachable(true);

        match body {
            GridResponse::Error {
                code,
                message,
                map,
                key,
            } => Err(error_from_wire(code, message, map, key)),
            ok => Ok(ok),
        }
    }

    fn mark_reachable(&self, now: bool) {
        let was = self.reachable.swap(now, Ordering::AcqRel);
        if was != now {
            if now {
                info!(url = %self.config.url, "grid host reachable");
            } else {
                warn!(url = %self.config.url, "grid host unreachable");
            }
        }
    }

    fn dispatch(&self, event: GridEvent) {
        let table = self.listeners.lock();
        match event.source {
            GridEventSource::Queue { name, event } => {
                let ls = listeners_of(&table.queues, &name);
                drop(table);
                for l in ls {
                    l(&event);
                }
            }
            GridEventSource::Map { name, event } => {
                let ls = listeners_of(&table.maps, &name);
                drop(table);
                for l in ls {
                    l(&event);
                }
            }
            GridEventSource::Topic { name, message } => {
                let ls = listeners_of(&table.topics, &name);
                drop(table);
                for l in ls {
                    l(&message);
                }
            }
        }
    }

    fn ensure_active(&self) -> GridResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GridError::NotActive)
        }
    }

    fn warn_if_inactive(&self, name: &str, id: SubscriptionId) {
        if !self.active.load(Ordering::Acquire) {
            warn!(structure = name, subscription = %id, "grid inactive while removing listener");
        }
    }
}

fn unexpected(response: GridResponse) -> GridError {
    GridError::Remote(format!("unexpected response: {response:?}"))
}

/// [`DistributedDataProvider`] talking to a grid host over HTTP.
#[derive(Clone)]
pub struct RemoteProvider {
    shared: Arc<Shared>,
}

impl RemoteProvider {
    /// Connect to the grid host and start the heartbeat and event loops.
    ///
    /// Fails when the host cannot be reached.
    pub async fn connect(config: RemoteConfig) -> GridResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GridError::Transport(e.to_string()))?;
        let endpoint = format!("{}{}", config.url.trim_end_matches('/'), GRID_RPC_PATH);

        let shared = Arc::new(Shared {
            http,
            endpoint,
            config,
            active: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            members: Mutex::new(Vec::new()),
            listeners: Mutex::new(ListenerTable::default()),
            cancel: CancellationToken::new(),
        });

        let head = match shared.call(GridRequest::EventsHead).await? {
            GridResponse::Sequence(s) => s,
            other => return Err(unexpected(other)),
        };
        heartbeat(&shared).await?;

        tokio::spawn(heartbeat_loop(Arc::clone(&shared)));
        tokio::spawn(event_loop(Arc::clone(&shared), head));
        info!(url = %shared.config.url, address = %shared.config.address, "connected to grid host");

        Ok(Self { shared })
    }

    /// Stop the background loops; later operations fail with [`GridError::NotActive`].
    pub fn shutdown(&self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.cancel.cancel();
    }
}

async fn heartbeat(shared: &Shared) -> GridResult<()> {
    let address = shared.config.address.clone();
    match shared.call(GridRequest::Heartbeat { address }).await? {
        GridResponse::Members(m) => {
            *shared.members.lock() = m;
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(shared.config.heartbeat_interval);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = heartbeat(&shared).await {
                    debug!(error = %e, "member heartbeat failed");
                }
            }
        }
    }
}

async fn event_loop(shared: Arc<Shared>, mut after: u64) {
    let timeout = shared.config.event_wait + shared.config.request_timeout;
    loop {
        let request = GridRequest::Events {
            after,
            max: shared.config.event_batch,
            wait_ms: shared.config.event_wait.as_millis() as u64,
        };
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            r = shared.call_with_timeout(request, timeout) => r,
        };
        match result {
            Ok(GridResponse::Events(batch)) => {
                if batch.missed {
                    warn!(after, next = batch.next, "fell behind the grid event log; some listener events were missed");
                }
                after = batch.next;
                for event in batch.events {
                    shared.dispatch(event);
                }
            }
            Ok(other) => warn!(response = ?other, "unexpected event response"),
            Err(e) => {
                debug!(error = %e, "event poll failed; retrying");
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.config.heartbeat_interval) => {}
                }
            }
        }
    }
    debug!("grid event loop stopped");
}

#[async_trait]
impl DistributedDataProvider for RemoteProvider {
    fn raw_queue(&self, name: &str) -> Arc<dyn RawQueue> {
        Arc::new(RemoteQueue {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn raw_map(&self, name: &str) -> Arc<dyn RawMap> {
        Arc::new(RemoteMap {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn raw_topic(&self, name: &str) -> Arc<dyn RawTopic> {
        Arc::new(RemoteTopic {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn lock_settings(&self) -> LockSettings {
        self.shared.config.locks
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    fn local_member_address(&self) -> String {
        self.shared.config.address.clone()
    }

    async fn member_addresses(&self) -> GridResult<Vec<String>> {
        match self.shared.call(GridRequest::Members).await? {
            GridResponse::Members(m) => {
                *self.shared.members.lock() = m.clone();
                Ok(m)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn no_data_member_available(&self) -> bool {
        self.member_addresses().await.is_err()
    }
}

struct RemoteQueue {
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl RawQueue for RemoteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: Value, position: QueuePosition) -> GridResult<()> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueuePush { queue, item, position }).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn push_all(&self, items: Vec<Value>) -> GridResult<()> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueuePushAll { queue, items }).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn poll(&self) -> GridResult<Option<Value>> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueuePoll { queue }).await? {
            GridResponse::Value(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn peek(&self) -> GridResult<Option<Value>> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueuePeek { queue }).await? {
            GridResponse::Value(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn size(&self) -> GridResult<usize> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueueSize { queue }).await? {
            GridResponse::Count(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn snapshot(&self) -> GridResult<Vec<Value>> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueueSnapshot { queue }).await? {
            GridResponse::Values(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_all(&self, items: Vec<Value>) -> GridResult<usize> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueueRemoveAll { queue, items }).await? {
            GridResponse::Count(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn clear(&self) -> GridResult<()> {
        let queue = self.name.clone();
        match self.shared.call(GridRequest::QueueClear { queue }).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn add_listener(&self, listener: QueueListener) -> GridResult<SubscriptionId> {
        self.shared.ensure_active()?;
        let id = SubscriptionId::next();
        self.shared
            .listeners
            .lock()
            .queues
            .entry(self.name.clone())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.shared.warn_if_inactive(&self.name, id);
        remove_from(&mut self.shared.listeners.lock().queues, &self.name, id)
    }
}

struct RemoteMap {
    name: String,
    shared: Arc<Shared>,
}

impl RemoteMap {
    async fn value(&self, request: GridRequest) -> GridResult<Option<Value>> {
        match self.shared.call(request).await? {
            GridResponse::Value(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn done(&self, request: GridRequest) -> GridResult<()> {
        match self.shared.call(request).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl RawMap for RemoteMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> GridResult<Option<Value>> {
        self.value(GridRequest::MapGet {
            map: self.name.clone(),
            key: key.to_string(),
        })
        .await
    }

    async fn get_all(&self, keys: Vec<String>) -> GridResult<Vec<(String, Value)>> {
        let map = self.name.clone();
        match self.shared.call(GridRequest::MapGetAll { map, keys }).await? {
            GridResponse::Entries(e) => Ok(e),
            other => Err(unexpected(other)),
        }
    }

    async fn put(&self, key: String, value: Value) -> GridResult<Option<Value>> {
        let map = self.name.clone();
        self.value(GridRequest::MapPut { map, key, value }).await
    }

    async fn put_if_absent(&self, key: String, value: Value) -> GridResult<Option<Value>> {
        let map = self.name.clone();
        self.value(GridRequest::MapPutIfAbsent { map, key, value })
            .await
    }

    async fn remove(&self, key: &str) -> GridResult<Option<Value>> {
        self.value(GridRequest::MapRemove {
            map: self.name.clone(),
            key: key.to_string(),
        })
        .await
    }

    async fn keys(&self) -> GridResult<Vec<String>> {
        let map = self.name.clone();
        match self.shared.call(GridRequest::MapKeys { map }).await? {
            GridResponse::Keys(k) => Ok(k),
            other => Err(unexpected(other)),
        }
    }

    async fn entries(&self) -> GridResult<Vec<(String, Value)>> {
        let map = self.name.clone();
        match self.shared.call(GridRequest::MapEntries { map }).await? {
            GridResponse::Entries(e) => Ok(e),
            other => Err(unexpected(other)),
        }
    }

    async fn len(&self) -> GridResult<usize> {
        let map = self.name.clone();
        match self.shared.call(GridRequest::MapLen { map }).await? {
            GridResponse::Count(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn clear(&self) -> GridResult<()> {
        self.done(GridRequest::MapClear {
            map: self.name.clone(),
        })
        .await
    }

    async fn lock(
        &self,
        key: &str,
        owner: &LockOwner,
        lease: Duration,
        wait: Duration,
    ) -> GridResult<()> {
        let request = GridRequest::MapLock {
            map: self.name.clone(),
            key: key.to_string(),
            owner: owner.clone(),
            lease_ms: lease.as_millis() as u64,
            wait_ms: wait.as_millis() as u64,
        };
        let timeout = wait + self.shared.config.request_timeout;
        match self.shared.call_with_timeout(request, timeout).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn try_lock(&self, key: &str, owner: &LockOwner, lease: Duration) -> GridResult<bool> {
        let request = GridRequest::MapTryLock {
            map: self.name.clone(),
            key: key.to_string(),
            owner: owner.clone(),
            lease_ms: lease.as_millis() as u64,
        };
        match self.shared.call(request).await? {
            GridResponse::Flag(b) => Ok(b),
            other => Err(unexpected(other)),
        }
    }

    async fn unlock(&self, key: &str, owner: &LockOwner) -> GridResult<()> {
        self.done(GridRequest::MapUnlock {
            map: self.name.clone(),
            key: key.to_string(),
            owner: owner.clone(),
        })
        .await
    }

    async fn is_locked(&self, key: &str) -> GridResult<bool> {
        let request = GridRequest::MapIsLocked {
            map: self.name.clone(),
            key: key.to_string(),
        };
        match self.shared.call(request).await? {
            GridResponse::Flag(b) => Ok(b),
            other => Err(unexpected(other)),
        }
    }

    async fn add_listener(&self, listener: MapListener) -> GridResult<SubscriptionId> {
        self.shared.ensure_active()?;
        let id = SubscriptionId::next();
        self.shared
            .listeners
            .lock()
            .maps
            .entry(self.name.clone())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.shared.warn_if_inactive(&self.name, id);
        remove_from(&mut self.shared.listeners.lock().maps, &self.name, id)
    }
}

struct RemoteTopic {
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl RawTopic for RemoteTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: Value) -> GridResult<()> {
        let topic = self.name.clone();
        match self.shared.call(GridRequest::TopicPublish { topic, message }).await? {
            GridResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn add_listener(&self, listener: TopicListener) -> GridResult<SubscriptionId> {
        self.shared.ensure_active()?;
        let id = SubscriptionId::next();
        self.shared
            .listeners
            .lock()
            .topics
            .entry(self.name.clone())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.shared.warn_if_inactive(&self.name, id);
        remove_from(&mut self.shared.listeners.lock().topics, &self.name, id)
    }
}
