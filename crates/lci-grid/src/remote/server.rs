use std::time::Duration;

use axum::{Json, Router, extract::State, routing::post};
use tracing::{debug, instrument};

use super::wire::{GridRequest, GridResponse};
use crate::{
    DistributedDataProvider, LocalProvider,
    error::{GridError, GridResult},
};

/// Path of the grid RPC endpoint.
pub const GRID_RPC_PATH: &str = "/grid/rpc";

/// Longest long-poll a client may ask for.
const MAX_EVENT_WAIT: Duration = Duration::from_secs(30);

/// Longest lease a remote member may take on a key.
const MAX_LOCK_LEASE: Duration = Duration::from_secs(600);

/// Longest a remote member may block waiting for a lock.
const MAX_LOCK_WAIT: Duration = Duration::from_secs(60);

/// Router exposing `grid` to remote members.
///
/// The provider should be built with an event log, otherwise remote listeners
/// never fire.
pub fn grid_router(grid: LocalProvider) -> Router {
    Router::new()
        .route(GRID_RPC_PATH, post(handle_rpc))
        .with_state(grid)
}

async fn handle_rpc(
    State(grid): State<LocalProvider>,
    Json(request): Json<GridRequest>,
) -> Json<GridResponse> {
    Json(match dispatch(&grid, request).await {
        Ok(resp) => resp,
        Err(e) => GridResponse::from(e),
    })
}

#[instrument(level = "trace", skip(grid))]
async fn dispatch(grid: &LocalProvider, request: GridRequest) -> GridResult<GridResponse> {
    use GridRequest as R;
    use GridResponse as S;

    Ok(match request {
        R::QueuePush {
            queue,
            item,
            position,
        } => {
            grid.raw_queue(&queue).push(item, position).await?;
            S::Done
        }
        R::QueuePushAll { queue, items } => {
            grid.raw_queue(&queue).push_all(items).await?;
            S::Done
        }
        R::QueuePoll { queue } => S::Value(grid.raw_queue(&queue).poll().await?),
        R::QueuePeek { queue } => S::Value(grid.raw_queue(&queue).peek().await?),
        R::QueueSize { queue } => S::Count(grid.raw_queue(&queue).size().await?),
        R::QueueSnapshot { queue } => S::Values(grid.raw_queue(&queue).snapshot().await?),
        R::QueueRemoveAll { queue, items } => {
            S::Count(grid.raw_queue(&queue).remove_all(items).await?)
        }
        R::QueueClear { queue } => {
            grid.raw_queue(&queue).clear().await?;
            S::Done
        }

        R::MapGet { map, key } => S::Value(grid.raw_map(&map).get(&key).await?),
        R::MapGetAll { map, keys } => S::Entries(grid.raw_map(&map).get_all(keys).await?),
        R::MapPut { map, key, value } => S::Value(grid.raw_map(&map).put(key, value).await?),
        R::MapPutIfAbsent { map, key, value } => {
            S::Value(grid.raw_map(&map).put_if_absent(key, value).await?)
        }
        R::MapRemove { map, key } => S::Value(grid.raw_map(&map).remove(&key).await?),
        R::MapKeys { map } => S::Keys(grid.raw_map(&map).keys().await?),
        R::MapEntries { map } => S::Entries(grid.raw_map(&map).entries().await?),
        R::MapLen { map } => S::Count(grid.raw_map(&map).len().await?),
        R::MapClear { map } => {
            grid.raw_map(&map).clear().await?;
            S::Done
        }
        R::MapLock {
            map,
            key,
            owner,
            lease_ms,
            wait_ms,
        } => {
            grid.raw_map(&map)
                .lock(
                    &key,
                    &owner,
                    Duration::from_millis(lease_ms).min(MAX_LOCK_LEASE),
                    Duration::from_millis(wait_ms).min(MAX_LOCK_WAIT),
                )
                .await?;
            S::Done
        }
        R::MapTryLock {
            map,
            key,
            owner,
            lease_ms,
        } => S::Flag(
            grid.raw_map(&map)
                .try_lock(&key, &owner, Duration::from_millis(lease_ms).min(MAX_LOCK_LEASE))
                .await?,
        ),
        R::MapUnlock { map, key, owner } => {
            grid.raw_map(&map).unlock(&key, &owner).await?;
            S::Done
        }
        R::MapIsLocked { map, key } => S::Flag(grid.raw_map(&map).is_locked(&key).await?),

        R::TopicPublish { topic, message } => {
            grid.raw_topic(&topic).publish(message).await?;
            S::Done
        }

        R::Heartbeat { address } => {
            grid.touch_member(&address);
            debug!(member = %address, "member heartbeat");
            S::Members(grid.member_addresses().await?)
        }
        R::Members => S::Members(grid.member_addresses().await?),
        R::EventsHead => {
            ensure_active(grid)?;
            S::Sequence(grid.event_log().map(|log| log.head()).unwrap_or(0))
        }
        R::Events {
            after,
            max,
            wait_ms,
        } => {
            ensure_active(grid)?;
            match grid.event_log() {
                Some(log) => {
                    let wait = Duration::from_millis(wait_ms).min(MAX_EVENT_WAIT);
                    S::Events(log.wait_after(after, max.max(1), wait).await)
                }
                None => {
                    return Err(GridError::Remote(
                        "grid host runs without an event log".to_string(),
                    ));
                }
            }
        }
    })
}

fn ensure_active(grid: &LocalProvider) -> GridResult<()> {
    if grid.is_active() {
        Ok(())
    } else {
        Err(GridError::NotActive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::LockOwner;

    fn lock(owner: &str, lease_ms: u64, wait_ms: u64) -> GridRequest {
        GridRequest::MapLock {
            map: "jobs".into(),
            key: "j1".into(),
            owner: LockOwner::from(owner),
            lease_ms,
            wait_ms,
        }
    }

    #[tokio::test]
    async fn oversized_lock_durations_are_clamped() {
        let grid = LocalProvider::default();

        let held = dispatch(&grid, lock("a", u64::MAX, u64::MAX)).await.unwrap();
        assert!(matches!(held, GridResponse::Done));

        let other = dispatch(
            &grid,
            GridRequest::MapTryLock {
                map: "jobs".into(),
                key: "j1".into(),
                owner: LockOwner::from("b"),
                lease_ms: u64::MAX,
            },
        )
        .await
        .unwrap();
        assert!(matches!(other, GridResponse::Flag(false)));
    }
}
