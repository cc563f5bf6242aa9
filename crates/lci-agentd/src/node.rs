use std::sync::Arc;

use anyhow::Context;
use lci_api::{AllowAll, Authorizer, CoreApiAdapter, HttpApi, StaticAuthorizer};
use lci_core::{AgentRegistry, BuildJobQueue, LivenessSweeper, MetricsHandle};
use lci_exec::{BuildAgent, DockerSandbox, JobRunner, ProcessSandbox, Sandbox, SandboxKind};
use lci_grid::{DistributedDataProvider, LocalConfig, LocalProvider, RemoteConfig, RemoteProvider, grid_router};
use lci_prometheus::PrometheusMetrics;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

use crate::config::{ApiSettings, GridMode, NodeConfig};

enum Grid {
    Local(LocalProvider),
    Remote(RemoteProvider),
}

impl Grid {
    async fn open(cfg: &NodeConfig, address: String) -> anyhow::Result<Self> {
        let grid = &cfg.grid;
        Ok(match grid.mode {
            GridMode::Local => Grid::Local(LocalProvider::new(LocalConfig {
                address,
                locks: grid.locks(),
                event_log_capacity: if grid.serve { grid.event_log_capacity } else { 0 },
                ..LocalConfig::default()
            })),
            GridMode::Remote => {
                let remote = RemoteProvider::connect(RemoteConfig {
                    url: grid.url.clone(),
                    address,
                    locks: grid.locks(),
                    ..RemoteConfig::default()
                })
                .await
                .with_context(|| format!("joining grid host {}", grid.url))?;
                Grid::Remote(remote)
            }
        })
    }

    fn provider(&self) -> &dyn DistributedDataProvider {
        match self {
            Grid::Local(p) => p,
            Grid::Remote(p) => p,
        }
    }

    fn shutdown(&self) {
        match self {
            Grid::Local(p) => p.shutdown(),
            Grid::Remote(p) => p.shutdown(),
        }
    }
}

/// A running node: grid membership, optional build agent, liveness sweeper, API.
pub struct Node {
    grid: Grid,
    agent: Option<BuildAgent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Node {
    pub async fn start(cfg: NodeConfig) -> anyhow::Result<Self> {
        let address = cfg.grid.member_address(cfg.api.bind);
        let grid = Grid::open(&cfg, address.clone()).await?;
        let provider = grid.provider();

        let metrics = cfg
            .api
            .metrics
            .then(PrometheusMetrics::new)
            .transpose()
            .context("registering metrics")?;
        let mut queue = BuildJobQueue::new(provider, cfg.queue.clone());
        if let Some(m) = &metrics {
            queue = queue.with_metrics(Arc::new(m.clone()));
        }
        let registry = AgentRegistry::new(provider, queue.history().clone());

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let sweeper = LivenessSweeper::new(queue.clone(), registry.clone(), cfg.liveness.clone());
        tasks.spawn(sweeper.run(cancel.child_token()));

        let agent = if cfg.agent.enabled {
            let handle: Option<MetricsHandle> = metrics.clone().map(|m| Arc::new(m) as MetricsHandle);
            let agent = build_agent(&cfg, queue.clone(), registry.clone(), handle, address)?;
            agent.start().await.context("starting build agent")?;
            Some(agent)
        } else {
            None
        };

        if cfg.api.enabled {
            let mut adapter = CoreApiAdapter::new(queue, registry);
            if let Some(m) = metrics {
                adapter = adapter.with_metrics(m);
            }
            let mut router = HttpApi::new(Arc::new(adapter), authorizer(&cfg.api)).router();
            if let (true, Grid::Local(local)) = (cfg.grid.serve, &grid) {
                router = router.merge(grid_router(local.clone()));
            }
            let listener = TcpListener::bind(cfg.api.bind)
                .await
                .with_context(|| format!("binding api listener {}", cfg.api.bind))?;
            info!(bind = %cfg.api.bind, serve_grid = cfg.grid.serve, "api listening");
            let stop = cancel.child_token();
            tasks.spawn(async move {
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
                {
                    error!(error = %e, "api server failed");
                }
            });
        }

        info!(mode = ?cfg.grid.mode, agent = cfg.agent.enabled, "node started");
        Ok(Self {
            grid,
            agent,
            cancel,
            tasks,
        })
    }

    /// Hand back unfinished jobs, then stop the sweeper, the API and the grid.
    pub async fn shutdown(self) {
        if let Some(agent) = &self.agent {
            agent.shutdown().await;
        }
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.grid.shutdown();
        info!("node stopped");
    }
}

fn build_agent(
    cfg: &NodeConfig,
    queue: BuildJobQueue,
    registry: AgentRegistry,
    metrics: Option<MetricsHandle>,
    address: String,
) -> anyhow::Result<BuildAgent> {
    let settings = &cfg.agent;
    let defaults = settings.validate()?;
    let sandbox: Arc<dyn Sandbox> = match settings.sandbox {
        SandboxKind::Docker => Arc::new(DockerSandbox::new()),
        SandboxKind::Process => Arc::new(ProcessSandbox::new().with_cgroups(settings.cgroups)),
    };
    let mut runner = JobRunner::new(queue.clone(), sandbox, defaults)
        .with_max_limits(settings.max_limits.clone())
        .with_log_config(settings.log_config())
        .with_cancel_poll(settings.cancel_poll_interval());
    if let Some(m) = metrics {
        runner = runner.with_metrics(m);
    }
    let agent = BuildAgent::new(settings, queue, registry, runner)?.with_address(address);
    info!(
        agent = %agent.id(),
        sandbox = ?settings.sandbox,
        pool_size = settings.pool_size(),
        "build agent configured"
    );
    Ok(agent)
}

fn authorizer(api: &ApiSettings) -> Arc<dyn Authorizer> {
    if api.allow_all {
        return Arc::new(AllowAll);
    }
    let mut auth = StaticAuthorizer::new();
    for admin in &api.admins {
        auth = auth.with_admin(admin.as_str());
    }
    for (course, users) in &api.instructors {
        for user in users {
            auth = auth.with_instructor(course.as_str(), user.as_str());
        }
    }
    Arc::new(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn local_node_starts_and_stops() {
        let mut cfg = NodeConfig::parse("[api]\nbind = \"127.0.0.1:0\"").unwrap();
        cfg.agent.sandbox = SandboxKind::Process;
        let node = Node::start(cfg).await.unwrap();

        let registry = AgentRegistry::new(
            node.grid.provider(),
            lci_core::RecentJobs::new(node.grid.provider(), 1),
        );
        assert_eq!(registry.list().await.unwrap().len(), 1);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn authorizer_reflects_the_api_section() {
        let api = ApiSettings {
            admins: vec!["root".into()],
            instructors: [("prog1".to_string(), vec!["alice".to_string()])].into(),
            ..ApiSettings::default()
        };
        let auth = authorizer(&api);
        assert!(auth.is_admin("root").await);
        assert!(auth.is_instructor("alice", &"prog1".into()).await);
        assert!(!auth.is_instructor("alice", &"prog2".into()).await);
    }
}
