//! Untyped primitives implemented by every provider.
//!
//! Values travel as [`serde_json::Value`] and map keys as strings so the same
//! contract can be served in-process or over the wire. Typed access lives in
//! [`crate::DistributedQueue`], [`crate::DistributedMap`] and [`crate::DistributedTopic`].
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GridResult;

static SUBSCRIPTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Next process-unique subscription id.
    pub fn next() -> Self {
        Self(SUBSCRIPTION_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Identity of a per-key lock holder.
///
/// Every acquisition uses a fresh owner, so locks are not reentrant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockOwner(String);

impl LockOwner {
    pub fn unique() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockOwner {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where [`RawQueue::push`] places an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueuePosition {
    /// Append. The item is unranked and sorts after every ranked item.
    Tail,
    /// Prepend, ahead of everything.
    Head,
    /// Insert after all items with rank `<= p`, before the first greater one.
    Priority(i64),
}

impl QueuePosition {
    /// Rank stored alongside the item.
    pub fn rank(&self) -> i64 {
        match self {
            QueuePosition::Tail => i64::MAX,
            QueuePosition::Head => i64::MIN,
            QueuePosition::Priority(p) => *p,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "item", rename_all = "camelCase")]
pub enum RawQueueEvent {
    Added(Value),
    Removed(Value),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RawMapEvent {
    Added { key: String, value: Value },
    Updated { key: String, old: Value, value: Value },
    Removed { key: String, old: Value },
    Cleared,
}

pub type QueueListener = Arc<dyn Fn(&RawQueueEvent) + Send + Sync>;
pub type MapListener = Arc<dyn Fn(&RawMapEvent) + Send + Sync>;
pub type TopicListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Cluster-wide FIFO with priority insertion.
///
/// `poll` is linearizable: concurrent pollers never receive the same item.
#[async_trait]
pub trait RawQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, item: Value, position: QueuePosition) -> GridResult<()>;
    async fn push_all(&self, items: Vec<Value>) -> GridResult<()>;
    async fn poll(&self) -> GridResult<Option<Value>>;
    async fn peek(&self) -> GridResult<Option<Value>>;
    async fn size(&self) -> GridResult<usize>;
    /// Point-in-time copy in queue order.
    async fn snapshot(&self) -> GridResult<Vec<Value>>;
    /// Remove every item equal to one of `items`; returns how many were removed.
    async fn remove_all(&self, items: Vec<Value>) -> GridResult<usize>;
    async fn clear(&self) -> GridResult<()>;

    async fn add_listener(&self, listener: QueueListener) -> GridResult<SubscriptionId>;
    /// Never fails: on an inactive grid the removal is logged and skipped.
    async fn remove_listener(&self, id: SubscriptionId) -> bool;
}

/// Cluster-wide map with advisory per-key locks.
#[async_trait]
pub trait RawMap: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> GridResult<Option<Value>>;
    async fn get_all(&self, keys: Vec<String>) -> GridResult<Vec<(String, Value)>>;
    /// Returns the previous value.
    async fn put(&self, key: String, value: Value) -> GridResult<Option<Value>>;
    /// Stores only when absent; returns the existing value otherwise.
    async fn put_if_absent(&self, key: String, value: Value) -> GridResult<Option<Value>>;
    async fn remove(&self, key: &str) -> GridResult<Option<Value>>;
    async fn keys(&self) -> GridResult<Vec<String>>;
    async fn entries(&self) -> GridResult<Vec<(String, Value)>>;
    async fn len(&self) -> GridResult<usize>;
    async fn clear(&self) -> GridResult<()>;

    /// Acquire the lock on `key` for `owner`, waiting up to `wait`.
    ///
    /// The lock expires after `lease` unless released earlier.
    async fn lock(
        &self,
        key: &str,
        owner: &LockOwner,
        lease: Duration,
        wait: Duration,
    ) -> GridResult<()>;
    async fn try_lock(&self, key: &str, owner: &LockOwner, lease: Duration) -> GridResult<bool>;
    async fn unlock(&self, key: &str, owner: &LockOwner) -> GridResult<()>;
    async fn is_locked(&self, key: &str) -> GridResult<bool>;

    async fn add_listener(&self, listener: MapListener) -> GridResult<SubscriptionId>;
    async fn remove_listener(&self, id: SubscriptionId) -> bool;
}

/// Fan-out publish/subscribe without replay.
#[async_trait]
pub trait RawTopic: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, message: Value) -> GridResult<()>;
    async fn add_listener(&self, listener: TopicListener) -> GridResult<SubscriptionId>;
    async fn remove_listener(&self, id: SubscriptionId) -> bool;
}
