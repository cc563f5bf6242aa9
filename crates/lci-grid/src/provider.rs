use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    DistributedMap, DistributedQueue, DistributedTopic, MapKey, Payload,
    error::GridResult,
    raw::{RawMap, RawQueue, RawTopic},
};

/// Default lease of a per-key lock.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);

/// Default time a caller waits for a contended per-key lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Lease and wait applied by [`DistributedMap::lock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockSettings {
    pub lease: Duration,
    pub wait: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LOCK_LEASE,
            wait: DEFAULT_LOCK_WAIT,
        }
    }
}

/// Source of the cluster-wide primitives.
///
/// Handles returned by `raw_*` are cheap; asking twice for the same name yields
/// views of the same structure.
#[async_trait]
pub trait DistributedDataProvider: Send + Sync {
    fn raw_queue(&self, name: &str) -> Arc<dyn RawQueue>;
    fn raw_map(&self, name: &str) -> Arc<dyn RawMap>;
    fn raw_topic(&self, name: &str) -> Arc<dyn RawTopic>;

    fn lock_settings(&self) -> LockSettings {
        LockSettings::default()
    }

    /// Whether the local node is an active grid member.
    fn is_active(&self) -> bool;

    /// Address under which this node is known to the grid.
    fn local_member_address(&self) -> String;

    /// Addresses of all members currently known to the grid.
    async fn member_addresses(&self) -> GridResult<Vec<String>>;

    /// `true` when no data-holding member is reachable, i.e. distributed
    /// operations cannot succeed right now.
    async fn no_data_member_available(&self) -> bool;
}

/// Typed constructors available on every provider, including `dyn` ones.
pub trait DataProviderExt: DistributedDataProvider {
    fn queue<T: Payload>(&self, name: &str) -> DistributedQueue<T> {
        DistributedQueue::new(self.raw_queue(name))
    }

    fn map<K: MapKey, V: Payload>(&self, name: &str) -> DistributedMap<K, V> {
        DistributedMap::new(self.raw_map(name), self.lock_settings())
    }

    fn topic<T: Payload>(&self, name: &str) -> DistributedTopic<T> {
        DistributedTopic::new(self.raw_topic(name))
    }
}

impl<P: DistributedDataProvider + ?Sized> DataProviderExt for P {}
