use std::{marker::PhantomData, sync::Arc};

use serde_json::Value;
use tracing::warn;

use crate::{
    Payload,
    error::GridResult,
    payload::{decode, encode},
    raw::{RawTopic, SubscriptionId},
};

/// Typed view over a [`RawTopic`].
///
/// Delivery is at-least-once to the listeners registered at publish time;
/// late subscribers see nothing published before they joined.
pub struct DistributedTopic<T> {
    raw: Arc<dyn RawTopic>,
    _msg: PhantomData<fn() -> T>,
}

impl<T> Clone for DistributedTopic<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _msg: PhantomData,
        }
    }
}

impl<T: Payload> DistributedTopic<T> {
    pub fn new(raw: Arc<dyn RawTopic>) -> Self {
        Self {
            raw,
            _msg: PhantomData,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub async fn publish(&self, message: &T) -> GridResult<()> {
        self.raw.publish(encode(message)?).await
    }

    pub async fn add_message_listener<F>(&self, listener: F) -> GridResult<SubscriptionId>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = self.name().to_string();
        self.raw
            .add_listener(Arc::new(move |message: &Value| {
                match decode::<T>(message.clone()) {
                    Ok(m) => listener(m),
                    Err(e) => warn!(topic = %topic, error = %e, "dropping undecodable message"),
                }
            }))
            .await
    }

    pub async fn remove_message_listener(&self, id: SubscriptionId) -> bool {
        self.raw.remove_listener(id).await
    }
}
