//! Grid shared over HTTP.
//!
//! One node hosts a [`crate::LocalProvider`] behind [`grid_router`]; every other
//! node uses [`RemoteProvider`]. Listener events reach remote members by
//! long-polling the host's event log.
mod client;
pub use client::{RemoteConfig, RemoteProvider};

mod server;
pub use server::{GRID_RPC_PATH, grid_router};

mod wire;
pub use wire::{ErrorCode, GridRequest, GridResponse};

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;

    use super::*;
    use crate::{DataProviderExt, DistributedDataProvider, GridError, LocalConfig, LocalProvider};

    async fn host() -> (LocalProvider, String) {
        let grid = LocalProvider::new(LocalConfig {
            address: "host".into(),
            event_log_capacity: 64,
            ..LocalConfig::default()
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let router = grid_router(grid.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (grid, url)
    }

    async fn member(url: &str, address: &str) -> RemoteProvider {
        RemoteProvider::connect(RemoteConfig {
            url: url.to_string(),
            address: address.to_string(),
            event_wait: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(100),
            ..RemoteConfig::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn members_share_queue_and_map() {
        let (_host, url) = host().await;
        let a = member(&url, "a").await;
        let b = member(&url, "b").await;

        a.queue::<u32>("q").offer(&2, 2).await.unwrap();
        a.queue::<u32>("q").offer(&1, 1).await.unwrap();
        assert_eq!(b.queue::<u32>("q").poll().await.unwrap(), Some(1));
        assert_eq!(b.queue::<u32>("q").size().await.unwrap(), 1);

        a.map::<String, String>("m")
            .put("k".into(), &"v".to_string())
            .await
            .unwrap();
        let seen = b.map::<String, String>("m").get(&"k".into()).await.unwrap();
        assert_eq!(seen.as_deref(), Some("v"));

        let members = a.member_addresses().await.unwrap();
        assert!(members.contains(&"a".to_string()));
        assert!(members.contains(&"b".to_string()));
        assert!(members.contains(&"host".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn locks_exclude_across_members() {
        let (_host, url) = host().await;
        let a = member(&url, "a").await;
        let b = member(&url, "b").await;
        let key = "job-1".to_string();

        let guard = a.map::<String, u32>("locks").lock(&key).await.unwrap();
        assert!(b.map::<String, u32>("locks").try_lock(&key).await.unwrap().is_none());

        let err = b
            .map::<String, u32>("locks")
            .lock_with_wait(&key, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GridError::LockTimeout { .. }));

        guard.unlock().await.unwrap();
        let g = b.map::<String, u32>("locks").lock(&key).await.unwrap();
        g.unlock().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn topic_messages_reach_remote_listeners() {
        let (_host, url) = host().await;
        let a = member(&url, "a").await;
        let b = member(&url, "b").await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            b.topic::<String>("t")
                .add_message_listener(move |m| seen.lock().push(m))
                .await
                .unwrap();
        }
        a.topic::<String>("t").publish(&"hello".to_string()).await.unwrap();

        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn host_shutdown_surfaces_not_active() {
        let (host, url) = host().await;
        let a = member(&url, "a").await;
        host.shutdown();

        let err = a.queue::<u32>("q").poll().await.unwrap_err();
        assert!(err.is_not_active());

        a.shutdown();
        assert!(!a.is_active());
        assert!(a.queue::<u32>("q").size().await.unwrap_err().is_not_active());
    }

    #[tokio::test]
    async fn unreachable_host_means_no_data_member() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = RemoteProvider::connect(RemoteConfig {
            url,
            request_timeout: Duration::from_millis(200),
            ..RemoteConfig::default()
        })
        .await
        .err()
        .unwrap();
        assert!(matches!(err, GridError::Transport(_)));
    }
}
