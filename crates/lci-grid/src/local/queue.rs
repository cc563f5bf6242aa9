use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use super::{GridState, Listeners};
use crate::{
    error::GridResult,
    local::events::GridEventSource,
    raw::{QueueListener, QueuePosition, RawQueue, RawQueueEvent, SubscriptionId},
};

struct Ranked {
    rank: i64,
    value: Value,
}

pub(crate) struct LocalQueue {
    name: String,
    state: Arc<GridState>,
    items: Mutex<VecDeque<Ranked>>,
    listeners: Listeners<QueueListener>,
}

impl LocalQueue {
    pub(crate) fn new(name: &str, state: Arc<GridState>) -> Self {
        Self {
            name: name.to_string(),
            state,
            items: Mutex::new(VecDeque::new()),
            listeners: Listeners::default(),
        }
    }

    fn emit(&self, events: Vec<RawQueueEvent>) {
        for event in events {
            self.state.record(|| GridEventSource::Queue {
                name: self.name.clone(),
                event: event.clone(),
            });
            for listener in self.listeners.snapshot() {
                listener(&event);
            }
        }
    }

    fn insert(items: &mut VecDeque<Ranked>, value: Value, position: QueuePosition) {
        let rank = position.rank();
        if position == QueuePosition::Head {
            items.push_front(Ranked { rank, value });
            return;
        }
        match items.iter().position(|r| r.rank > rank) {
            Some(idx) => items.insert(idx, Ranked { rank, value }),
            None => items.push_back(Ranked { rank, value }),
        }
    }
}

#[async_trait]
impl RawQueue for LocalQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: Value, position: QueuePosition) -> GridResult<()> {
        self.state.ensure_active()?;
        Self::insert(&mut self.items.lock(), item.clone(), position);
        trace!(queue = %self.name, ?position, "item pushed");
        self.emit(vec![RawQueueEvent::Added(item)]);
        Ok(())
    }

    async fn push_all(&self, items: Vec<Value>) -> GridResult<()> {
        self.state.ensure_active()?;
        {
            let mut queue = self.items.lock();
            for item in &items {
                Self::insert(&mut queue, item.clone(), QueuePosition::Tail);
            }
        }
        self.emit(items.into_iter().map(RawQueueEvent::Added).collect());
        Ok(())
    }

    async fn poll(&self) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        let head = self.items.lock().pop_front().map(|r| r.value);
        if let Some(v) = &head {
            self.emit(vec![RawQueueEvent::Removed(v.clone())]);
        }
        Ok(head)
    }

    async fn peek(&self) -> GridResult<Option<Value>> {
        self.state.ensure_active()?;
        Ok(self.items.lock().front().map(|r| r.value.clone()))
    }

    async fn size(&self) -> GridResult<usize> {
        self.state.ensure_active()?;
        Ok(self.items.lock().len())
    }

    async fn snapshot(&self) -> GridResult<Vec<Value>> {
        self.state.ensure_active()?;
        Ok(self.items.lock().iter().map(|r| r.value.clone()).collect())
    }

    async fn remove_all(&self, items: Vec<Value>) -> GridResult<usize> {
        self.state.ensure_active()?;
        let mut removed = Vec::new();
        self.items.lock().retain(|r| {
            if items.contains(&r.value) {
                removed.push(r.value.clone());
                false
            } else {
                true
            }
        });
        let count = removed.len();
        self.emit(removed.into_iter().map(RawQueueEvent::Removed).collect());
        Ok(count)
    }

    async fn clear(&self) -> GridResult<()> {
        self.state.ensure_active()?;
        let drained: Vec<Value> = self.items.lock().drain(..).map(|r| r.value).collect();
        self.emit(drained.into_iter().map(RawQueueEvent::Removed).collect());
        Ok(())
    }

    async fn add_listener(&self, listener: QueueListener) -> GridResult<SubscriptionId> {
        self.state.ensure_active()?;
        Ok(self.listeners.add(listener))
    }

    async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.state.warn_if_inactive(&self.name, id);
        self.listeners.remove(id)
    }
}
