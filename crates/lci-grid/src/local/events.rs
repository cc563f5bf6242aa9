use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

use crate::raw::{RawMapEvent, RawQueueEvent};

/// Which structure produced an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum GridEventSource {
    Queue { name: String, event: RawQueueEvent },
    Map { name: String, event: RawMapEvent },
    Topic { name: String, message: Value },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridEvent {
    pub seq: u64,
    pub source: GridEventSource,
}

/// Slice of the log returned to a reader.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<GridEvent>,
    /// Sequence to pass as `after` on the next read.
    pub next: u64,
    /// Events between `after` and the first returned one were evicted.
    pub missed: bool,
}

struct LogInner {
    events: VecDeque<GridEvent>,
    last_seq: u64,
}

/// Bounded, sequence-numbered record of every mutation, used to ship listener
/// events to remote members.
pub struct EventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
    appended: Notify,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                last_seq: 0,
            }),
            capacity: capacity.max(1),
            appended: Notify::new(),
        }
    }

    pub(crate) fn append(&self, source: GridEventSource) {
        {
            let mut inner = self.inner.lock();
            inner.last_seq += 1;
            let seq = inner.last_seq;
            inner.events.push_back(GridEvent { seq, source });
            while inner.events.len() > self.capacity {
                inner.events.pop_front();
            }
        }
        self.appended.notify_waiters();
    }

    /// Sequence number of the newest event, `0` when nothing was appended yet.
    pub fn head(&self) -> u64 {
        self.inner.lock().last_seq
    }

    /// Up to `max` events with `seq > after`.
    pub fn read_after(&self, after: u64, max: usize) -> EventBatch {
        let inner = self.inner.lock();
        let missed = matches!(inner.events.front(), Some(first) if first.seq > after + 1);
        let events: Vec<GridEvent> = inner
            .events
            .iter()
            .filter(|e| e.seq > after)
            .take(max)
            .cloned()
            .collect();
        // A reader ahead of the log (host restarted) is pulled back to the head.
        let next = events
            .last()
            .map(|e| e.seq)
            .unwrap_or(after.min(inner.last_seq));
        EventBatch {
            events,
            next,
            missed,
        }
    }

    /// Like [`EventLog::read_after`], but waits up to `wait` for something new.
    pub async fn wait_after(&self, after: u64, max: usize, wait: Duration) -> EventBatch {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batch = self.read_after(after, max);
            if !batch.events.is_empty() || tokio::time::Instant::now() >= deadline {
                return batch;
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return self.read_after(after, max);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_event(n: i64) -> GridEventSource {
        GridEventSource::Topic {
            name: "t".into(),
            message: Value::from(n),
        }
    }

    #[test]
    fn evicts_oldest_and_flags_missed() {
        let log = EventLog::new(2);
        for n in 0..4 {
            log.append(topic_event(n));
        }
        assert_eq!(log.head(), 4);

        let batch = log.read_after(0, 10);
        assert!(batch.missed);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].seq, 3);
        assert_eq!(batch.next, 4);

        let caught_up = log.read_after(2, 10);
        assert!(!caught_up.missed);
        assert_eq!(caught_up.events.len(), 2);
    }

    #[tokio::test]
    async fn wait_after_wakes_on_append() {
        let log = std::sync::Arc::new(EventLog::new(8));
        let reader = {
            let log = log.clone();
            tokio::spawn(async move { log.wait_after(0, 10, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append(topic_event(7));

        let batch = reader.await.unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.next, 1);
    }

    #[tokio::test]
    async fn wait_after_times_out_empty() {
        let log = EventLog::new(8);
        let batch = log.wait_after(0, 10, Duration::from_millis(20)).await;
        assert!(batch.events.is_empty());
        assert_eq!(batch.next, 0);
    }
}
