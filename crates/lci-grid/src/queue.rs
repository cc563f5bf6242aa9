use std::{marker::PhantomData, sync::Arc};

use tracing::warn;

use crate::{
    Payload,
    error::GridResult,
    payload::{decode, encode},
    raw::{QueuePosition, RawQueue, RawQueueEvent, SubscriptionId},
};

/// Item event delivered to queue listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueItemEvent<T> {
    Added(T),
    Removed(T),
}

/// Typed view over a [`RawQueue`].
pub struct DistributedQueue<T> {
    raw: Arc<dyn RawQueue>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for DistributedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _item: PhantomData,
        }
    }
}

impl<T: Payload> DistributedQueue<T> {
    pub fn new(raw: Arc<dyn RawQueue>) -> Self {
        Self {
            raw,
            _item: PhantomData,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// Append to the tail.
    pub async fn add(&self, item: &T) -> GridResult<()> {
        self.raw.push(encode(item)?, QueuePosition::Tail).await
    }

    /// Insert at the head, ahead of everything already queued.
    pub async fn add_first(&self, item: &T) -> GridResult<()> {
        self.raw.push(encode(item)?, QueuePosition::Head).await
    }

    /// Insert in priority order; lower is more urgent, equal priorities keep FIFO order.
    pub async fn offer(&self, item: &T, priority: i64) -> GridResult<()> {
        self.raw
            .push(encode(item)?, QueuePosition::Priority(priority))
            .await
    }

    pub async fn add_all(&self, items: &[T]) -> GridResult<()> {
        let values = items.iter().map(encode).collect::<GridResult<Vec<_>>>()?;
        self.raw.push_all(values).await
    }

    /// Remove and return the head, or `None` when empty. Never blocks.
    pub async fn poll(&self) -> GridResult<Option<T>> {
        self.raw.poll().await?.map(decode).transpose()
    }

    pub async fn peek(&self) -> GridResult<Option<T>> {
        self.raw.peek().await?.map(decode).transpose()
    }

    pub async fn size(&self) -> GridResult<usize> {
        self.raw.size().await
    }

    pub async fn is_empty(&self) -> GridResult<bool> {
        Ok(self.size().await? == 0)
    }

    /// Point-in-time copy in queue order.
    pub async fn snapshot(&self) -> GridResult<Vec<T>> {
        self.raw
            .snapshot()
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Remove every queued item equal to one of `items`.
    pub async fn remove_all(&self, items: &[T]) -> GridResult<usize> {
        let values = items.iter().map(encode).collect::<GridResult<Vec<_>>>()?;
        self.raw.remove_all(values).await
    }

    pub async fn clear(&self) -> GridResult<()> {
        self.raw.clear().await
    }

    /// Register an item added/removed listener.
    ///
    /// Items that fail to decode are logged and skipped.
    pub async fn add_item_listener<F>(&self, listener: F) -> GridResult<SubscriptionId>
    where
        F: Fn(QueueItemEvent<T>) + Send + Sync + 'static,
    {
        let queue = self.name().to_string();
        self.raw
            .add_listener(Arc::new(move |event: &RawQueueEvent| {
                let typed = match event {
                    RawQueueEvent::Added(v) => decode(v.clone()).map(QueueItemEvent::Added),
                    RawQueueEvent::Removed(v) => decode(v.clone()).map(QueueItemEvent::Removed),
                };
                match typed {
                    Ok(ev) => listener(ev),
                    Err(e) => warn!(queue = %queue, error = %e, "dropping undecodable queue event"),
                }
            }))
            .await
    }

    pub async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.raw.remove_listener(id).await
    }
}
