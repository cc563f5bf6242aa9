//! Cluster-wide queue, map and topic primitives with per-key locking, and a
//! keyed cache built on top of them.
//!
//! Everything is reached through a [`DistributedDataProvider`]: [`LocalProvider`]
//! keeps state in process, `RemoteProvider` (feature `remote`) talks to a grid host.
mod error;
pub use error::{GridError, GridResult};

mod payload;
pub use payload::{MapKey, Payload};

mod raw;
pub use raw::{
    LockOwner, MapListener, QueueListener, QueuePosition, RawMap, RawMapEvent, RawQueue,
    RawQueueEvent, RawTopic, SubscriptionId, TopicListener,
};

mod provider;
pub use provider::{
    DEFAULT_LOCK_LEASE, DEFAULT_LOCK_WAIT, DataProviderExt, DistributedDataProvider, LockSettings,
};

mod queue;
pub use queue::{DistributedQueue, QueueItemEvent};

mod map;
pub use map::{DistributedMap, KeyLockGuard, MapEntryEvent};

mod topic;
pub use topic::DistributedTopic;

mod cache;
pub use cache::{CacheEntry, CacheFactory, CacheHandler};

mod local;
pub use local::{EventBatch, EventLog, GridEvent, GridEventSource, LocalConfig, LocalProvider};

#[cfg(feature = "remote")]
pub mod remote;
#[cfg(feature = "remote")]
pub use remote::{RemoteConfig, RemoteProvider, grid_router};
