use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{GridState, Listeners};
use crate::{
    error::GridResult,
    local::events::GridEventSource,
    raw::{RawTopic, SubscriptionId, TopicListener},
};

pub(crate) struct LocalTopic {
    name: String,
    state: Arc<GridState>,
    listeners: Listeners<TopicListener>,
}

impl LocalTopic {
    pub(crate) fn new(name: &str, state: Arc<GridState>) -> Self {
        Self {
            name: name.to_string(),
            state,
            listeners: Listeners::default(),
        }
    }
}

#[async_trait]
impl RawTopic for LocalTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: Value) -> GridResult<()> {
        self.state.ensure_active()?;
        self.state.record(|| GridEventSource::Topic {
            name: self.name.clone(),
            message: message.clone(),
        });
        for listener in self.listeners.snapshot() {
            listener(&message);
        }
        Ok(())
    }

    async fn add_listener(&self, listener: TopicListener) -> GridResult<SubscriptionId> {
        self.state.ensure_active()?;
        Ok(self.listeners.add(listener))
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.state.warn_if_inactive(&self.name, id);
        self.listeners.remove(id)
    }
}
