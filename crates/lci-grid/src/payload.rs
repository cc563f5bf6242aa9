use std::{fmt, str::FromStr};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{GridError, GridResult};

/// Anything that can be stored in a grid structure.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Types usable as map keys. Keys travel as their `Display` form.
pub trait MapKey: fmt::Display + FromStr<Err: fmt::Display> + Clone + Ord + Send + Sync + 'static {}

impl<K> MapKey for K where K: fmt::Display + FromStr<Err: fmt::Display> + Clone + Ord + Send + Sync + 'static {}

pub(crate) fn encode<T: Serialize>(value: &T) -> GridResult<Value> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> GridResult<T> {
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn parse_key<K: MapKey>(raw: &str) -> GridResult<K> {
    raw.parse::<K>().map_err(|e| GridError::InvalidKey {
        key: raw.to_string(),
        reason: e.to_string(),
    })
}
