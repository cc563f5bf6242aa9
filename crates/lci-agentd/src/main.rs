mod config;
mod node;

use lci_observe::init_logger;
use tracing::info;

use crate::{config::NodeConfig, node::Node};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let path = NodeConfig::path_from_env();
    let cfg = NodeConfig::load(path.as_deref())?;
    init_logger(&cfg.logger)?;
    info!(config = ?path, "configuration loaded");

    let node = Node::start(cfg).await?;
    shutdown_signal().await;
    info!("shutdown requested");
    node.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
