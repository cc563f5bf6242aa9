use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::GridError,
    local::EventBatch,
    raw::{LockOwner, QueuePosition},
};

/// One call against the grid host.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GridRequest {
    QueuePush { queue: String, item: Value, position: QueuePosition },
    QueuePushAll { queue: String, items: Vec<Value> },
    QueuePoll { queue: String },
    QueuePeek { queue: String },
    QueueSize { queue: String },
    QueueSnapshot { queue: String },
    QueueRemoveAll { queue: String, items: Vec<Value> },
    QueueClear { queue: String },

    MapGet { map: String, key: String },
    MapGetAll { map: String, keys: Vec<String> },
    MapPut { map: String, key: String, value: Value },
    MapPutIfAbsent { map: String, key: String, value: Value },
    MapRemove { map: String, key: String },
    MapKeys { map: String },
    MapEntries { map: String },
    MapLen { map: String },
    MapClear { map: String },
    MapLock { map: String, key: String, owner: LockOwner, lease_ms: u64, wait_ms: u64 },
    MapTryLock { map: String, key: String, owner: LockOwner, lease_ms: u64 },
    MapUnlock { map: String, key: String, owner: LockOwner },
    MapIsLocked { map: String, key: String },

    TopicPublish { topic: String, message: Value },

    /// Member heartbeat; answered with the current member list.
    Heartbeat { address: String },
    Members,
    /// Latest event sequence, where a new listener starts reading.
    EventsHead,
    /// Long-poll for events after `after`.
    Events { after: u64, max: usize, wait_ms: u64 },
}

/// Wire-level error class, mapped back to [`GridError`] on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    NotActive,
    LockTimeout,
    NotLockOwner,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "camelCase")]
pub enum GridResponse {
    Done,
    Value(Option<Value>),
    Values(Vec<Value>),
    Entries(Vec<(String, Value)>),
    Keys(Vec<String>),
    Count(usize),
    Flag(bool),
    Sequence(u64),
    Members(Vec<String>),
    Events(EventBatch),
    Error { code: ErrorCode, message: String, map: String, key: String },
}

impl From<GridError> for GridResponse {
    fn from(err: GridError) -> Self {
        let (code, map, key) = match &err {
            GridError::NotActive => (ErrorCode::NotActive, String::new(), String::new()),
            GridError::LockTimeout { map, key } => (ErrorCode::LockTimeout, map.clone(), key.clone()),
            GridError::NotLockOwner { map, key } => {
                (ErrorCode::NotLockOwner, map.clone(), key.clone())
            }
            _ => (ErrorCode::Other, String::new(), String::new()),
        };
        GridResponse::Error {
            code,
            message: err.to_string(),
            map,
            key,
        }
    }
}

pub(crate) fn error_from_wire(code: ErrorCode, message: String, map: String, key: String) -> GridError {
    match code {
        ErrorCode::NotActive => GridError::NotActive,
        ErrorCode::LockTimeout => GridError::LockTimeout { map, key },
        ErrorCode::NotLockOwner => GridError::NotLockOwner { map, key },
        ErrorCode::Other => GridError::Remote(message),
    }
}
