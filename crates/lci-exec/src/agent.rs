//! The build agent hosted by a node.
//!
//! One claim loop pulls jobs from the cluster queue whenever the queue
//! changes (or on a tick), hands them to the local [`ExecutionPool`] and
//! reports results through the [`JobRunner`]. A heartbeat loop keeps the
//! registry entry fresh. Pause and resume arrive over the grid topics.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use lci_core::{AgentRegistry, BuildJobQueue};
use lci_grid::{QueueItemEvent, SubscriptionId};
use lci_model::{AgentId, AgentInfo, AgentStatus, JobId, RunningJob};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{Notify, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, instrument, warn};

use crate::{AgentSettings, ExecError, ExecutionPool, JobRunner};

const POOL_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
}

#[derive(Default)]
struct Subscriptions {
    queue: Option<SubscriptionId>,
    pause: Option<SubscriptionId>,
    resume: Option<SubscriptionId>,
}

struct Inner {
    id: AgentId,
    display_name: String,
    address: String,
    fingerprint: Option<String>,

    queue: BuildJobQueue,
    registry: AgentRegistry,
    runner: JobRunner,
    pool: ExecutionPool,

    heartbeat_interval: Duration,
    claim_interval: Duration,
    pause_grace: Duration,

    paused: AtomicBool,
    /// Stop tokens of the jobs this agent currently executes.
    jobs: Mutex<HashMap<JobId, CancellationToken>>,
    grace: Mutex<Option<CancellationToken>>,
    subscriptions: Mutex<Subscriptions>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct BuildAgent {
    inner: Arc<Inner>,
}

impl BuildAgent {
    pub fn new(
        settings: &AgentSettings,
        queue: BuildJobQueue,
        registry: AgentRegistry,
        runner: JobRunner,
    ) -> Result<Self, ExecError> {
        settings.validate()?;
        let id: AgentId = settings.name.parse().map_err(|e| ExecError::InvalidConfig(format!("{e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                display_name: settings.display_name(),
                address: String::new(),
                fingerprint: settings.public_key_fingerprint()?,
                queue,
                registry,
                runner,
                pool: ExecutionPool::new(settings.pool_size(), settings.queue_capacity),
                heartbeat_interval: settings.heartbeat_interval(),
                claim_interval: settings.claim_interval(),
                pause_grace: settings.pause_grace_period(),
                paused: AtomicBool::new(false),
                jobs: Mutex::new(HashMap::new()),
                grace: Mutex::new(None),
                subscriptions: Mutex::new(Subscriptions::default()),
                wake: Arc::new(Notify::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }

    /// Member address advertised in the registry. Call before [`BuildAgent::start`].
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.address = address.into();
        }
        self
    }

    #[inline]
    pub fn id(&self) -> &AgentId {
        &self.inner.id
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn running_jobs(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Registry entry as of now.
    pub fn info(&self) -> AgentInfo {
        self.inner.info()
    }

    /// Register, subscribe to queue and control topics, start the loops.
    #[instrument(level = "info", skip(self), fields(agent = %self.inner.id))]
    pub async fn start(&self) -> Result<(), ExecError> {
        let inner = &self.inner;
        inner.registry.register(&inner.info()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let wake = Arc::clone(&inner.wake);
        let queue_sub = inner
            .queue
            .pending()
            .add_item_listener(move |ev| {
                if matches!(ev, QueueItemEvent::Added(_)) {
                    wake.notify_one();
                }
            })
            .await?;
        let pause_sub = inner
            .queue
            .pause_topic()
            .add_message_listener(control_listener(inner.id.clone(), Control::Pause, tx.clone()))
            .await?;
        let resume_sub = inner
            .queue
            .resume_topic()
            .add_message_listener(control_listener(inner.id.clone(), Control::Resume, tx))
            .await?;
        *inner.subscriptions.lock() = Subscriptions {
            queue: Some(queue_sub),
            pause: Some(pause_sub),
            resume: Some(resume_sub),
        };

        inner.tasks.spawn(Arc::clone(inner).claim_loop());
        inner.tasks.spawn(Arc::clone(inner).heartbeat_loop());
        inner.tasks.spawn(Arc::clone(inner).control_loop(rx));
        info!(
            pool = inner.pool.size(),
            queue_capacity = inner.pool.queue_capacity(),
            "build agent started"
        );
        Ok(())
    }

    /// Stop claiming; running jobs are handed back after the grace period.
    pub async fn pause(&self) {
        self.inner.pause().await;
    }

    pub async fn resume(&self) {
        self.inner.resume().await;
    }

    /// Stop every loop and job, hand unfinished jobs back and leave the registry.
    #[instrument(level = "info", skip(self), fields(agent = %self.inner.id))]
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let subs = std::mem::take(&mut *inner.subscriptions.lock());
        if let Some(id) = subs.queue {
            inner.queue.pending().remove_listener(id).await;
        }
        if let Some(id) = subs.pause {
            inner.queue.pause_topic().remove_message_listener(id).await;
        }
        if let Some(id) = subs.resume {
            inner.queue.resume_topic().remove_message_listener(id).await;
        }

        inner.pool.shutdown(POOL_DRAIN_TIMEOUT).await;
        inner.tasks.close();
        inner.tasks.wait().await;

        match inner.queue.requeue_on_agent_loss(&inner.id).await {
            Ok(report) if !report.is_empty() => {
                info!(requeued = report.requeued.len(), failed = report.failed.len(), "unfinished jobs handed back")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not hand back unfinished jobs; the liveness sweep will"),
        }
        if let Err(e) = inner.registry.deregister(&inner.id).await {
            warn!(error = %e, "failed to deregister agent");
        }
        info!("build agent stopped");
    }
}

fn control_listener(
    me: AgentId,
    control: Control,
    tx: mpsc::UnboundedSender<Control>,
) -> impl Fn(AgentId) + Send + Sync + 'static {
    move |target: AgentId| {
        if target == me {
            let _ = tx.send(control);
        }
    }
}

impl Inner {
    fn info(&self) -> AgentInfo {
        let running = self.jobs.lock().len();
        let paused = self.paused.load(Ordering::Acquire);
        let mut info = AgentInfo::new(self.id.clone(), self.pool.size());
        info.display_name = self.display_name.clone();
        info.address = self.address.clone();
        info.running_jobs = running;
        info.status = AgentStatus::derive(paused, running);
        info.last_heartbeat = OffsetDateTime::now_utc();
        info.public_key_fingerprint = self.fingerprint.clone();
        info
    }

    async fn beat(&self) {
        if let Err(e) = self.registry.heartbeat(&self.info()).await {
            warn!(agent = %self.id, error = %e, "heartbeat failed");
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.heartbeat_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => self.beat().await,
            }
        }
    }

    async fn claim_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.claim_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
            }
            self.claim_cycle().await;
        }
    }

    async fn control_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Control>) {
        loop {
            let control = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                c = rx.recv() => match c {
                    Some(c) => c,
                    None => break,
                },
            };
            match control {
                Control::Pause => self.pause().await,
                Control::Resume => self.resume().await,
            }
        }
    }

    async fn claim_cycle(self: &Arc<Self>) {
        if self.paused.load(Ordering::Acquire) || self.shutdown.is_cancelled() {
            return;
        }
        let free = self.pool.free_slots();
        if free == 0 {
            return;
        }
        let claimed = match self.queue.claim_next(&self.id, free).await {
            Ok(c) => c,
            Err(e) if e.is_grid_unavailable() => {
                debug!(error = %e, "grid unavailable; claim skipped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "claim failed");
                return;
            }
        };
        let any = !claimed.is_empty();
        for running in claimed {
            self.dispatch(running).await;
        }
        if any {
            self.beat().await;
        }
    }

    async fn dispatch(self: &Arc<Self>, running: RunningJob) {
        let id = running.job.id.clone();
        let stop = self.shutdown.child_token();
        self.jobs.lock().insert(id.clone(), stop.clone());

        let inner = Arc::clone(self);
        let job = running.clone();
        let submitted = self.pool.submit(async move {
            let job_id = job.job.id.clone();
            inner.runner.run_and_report(job, stop).await;
            inner.jobs.lock().remove(&job_id);
            inner.wake.notify_one();
        });

        if let Err(e) = submitted {
            self.jobs.lock().remove(&id);
            debug!(job = %id, error = %e, "pool rejected claimed job");
            match self.queue.release_claim(&running).await {
                Ok(outcome) => debug!(job = %id, ?outcome, "claim released"),
                Err(e) => warn!(job = %id, error = %e, "failed to release claim; the liveness sweep will"),
            }
        }
    }

    async fn pause(self: &Arc<Self>) {
        if self.paused.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(agent = %self.id, grace_ms = self.pause_grace.as_millis() as u64, "agent paused");
        let grace = CancellationToken::new();
        if let Some(previous) = self.grace.lock().replace(grace.clone()) {
            previous.cancel();
        }
        self.beat().await;

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = grace.cancelled() => return,
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(inner.pause_grace) => {}
            }
            inner.evacuate().await;
        });
    }

    /// Hand running jobs back and kill their sandboxes.
    async fn evacuate(&self) {
        if !self.paused.load(Ordering::Acquire) {
            return;
        }
        match self.queue.requeue_paused(&self.id).await {
            Ok(report) => info!(
                agent = %self.id,
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "pause grace expired; jobs handed back"
            ),
            Err(e) => warn!(agent = %self.id, error = %e, "failed to hand back jobs of paused agent"),
        }
        let stops: Vec<CancellationToken> = self.jobs.lock().values().cloned().collect();
        for stop in stops {
            stop.cancel();
        }
    }

    async fn resume(&self) {
        if !self.paused.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(grace) = self.grace.lock().take() {
            grace.cancel();
        }
        info!(agent = %self.id, "agent resumed");
        self.beat().await;
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use lci_core::{QueueConfig, RecentJobs};
    use lci_grid::LocalProvider;
    use lci_model::{JobDescriptor, JobStatus, ResourceRequirements};

    use super::*;
    use crate::{ContainerLimits, ProcessSandbox};

    struct Fixture {
        queue: BuildJobQueue,
        registry: AgentRegistry,
        agent: BuildAgent,
    }

    fn fixture(grid: &LocalProvider, pool_size: usize, grace_ms: u64) -> Fixture {
        let queue = BuildJobQueue::new(grid, QueueConfig::default());
        let registry = AgentRegistry::new(grid, queue.history().clone());
        let runner = JobRunner::new(queue.clone(), Arc::new(ProcessSandbox::new()), ContainerLimits::default())
            .with_cancel_poll(Duration::from_millis(20));
        let settings = AgentSettings {
            name: "agent-1".into(),
            pool_size: Some(pool_size),
            queue_capacity: 0,
            heartbeat_interval_ms: 50,
            claim_interval_ms: 50,
            pause_grace_period_ms: grace_ms,
            ..AgentSettings::default()
        };
        let agent = BuildAgent::new(&settings, queue.clone(), registry.clone(), runner).unwrap();
        Fixture { queue, registry, agent }
    }

    fn job(steps: &[&str]) -> JobDescriptor {
        JobDescriptor::new(
            "c",
            ResourceRequirements::script("unused", steps.iter().map(|s| s.to_string()).collect()),
        )
    }

    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !check().await {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn agent_claims_runs_and_reports() {
        let grid = LocalProvider::default();
        let f = fixture(&grid, 2, 30_000);
        let (queue, agent) = (&f.queue, &f.agent);
        agent.start().await.unwrap();
        assert!(f.registry.contains(agent.id()).await.unwrap());

        let j = job(&["echo built"]);
        queue.enqueue(j.clone()).await.unwrap();

        eventually("job history", || async move {
            !queue.history().for_agent(agent.id()).await.unwrap().is_empty()
        })
        .await;
        let history = queue.history().for_agent(agent.id()).await.unwrap();
        assert_eq!(history[0].job.id, j.id);
        assert_eq!(history[0].status, JobStatus::Completed);
        assert!(queue.running_jobs().await.unwrap().is_empty());

        agent.shutdown().await;
        assert!(!f.registry.contains(agent.id()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn paused_agent_hands_jobs_back_after_grace() {
        let grid = LocalProvider::default();
        let f = fixture(&grid, 1, 100);
        let (queue, agent) = (&f.queue, &f.agent);
        agent.start().await.unwrap();

        let j = job(&["sleep 30"]);
        let jid = &j.id;
        queue.enqueue(j.clone()).await.unwrap();
        eventually("claim", || async move { queue.running_job(jid).await.unwrap().is_some() }).await;

        queue.pause_agent(agent.id()).await.unwrap();
        eventually("pause", || async move { agent.is_paused() }).await;
        eventually("requeue", || async move { !queue.queued_jobs().await.unwrap().is_empty() }).await;

        let queued = queue.queued_jobs().await.unwrap();
        assert_eq!(&queued[0].job.id, jid);
        assert_eq!(queued[0].job.retry_count, 1);
        eventually("sandbox killed", || async move { agent.running_jobs() == 0 }).await;
        assert_eq!(f.registry.get(agent.id()).await.unwrap().status, AgentStatus::Paused);

        // Still paused: the requeued job stays in the queue.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.queued_jobs().await.unwrap().len(), 1);

        queue.resume_agent(agent.id()).await.unwrap();
        eventually("reclaim", || async move { queue.running_job(jid).await.unwrap().is_some() }).await;
        agent.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resume_within_grace_keeps_jobs_running() {
        let grid = LocalProvider::default();
        let f = fixture(&grid, 1, 5_000);
        let (queue, agent) = (&f.queue, &f.agent);
        agent.start().await.unwrap();

        let j = job(&["sleep 30"]);
        let jid = &j.id;
        queue.enqueue(j.clone()).await.unwrap();
        eventually("claim", || async move { queue.running_job(jid).await.unwrap().is_some() }).await;

        agent.pause().await;
        agent.resume().await;
        assert!(!agent.is_paused());
        assert!(queue.queued_jobs().await.unwrap().is_empty());
        assert_eq!(agent.running_jobs(), 1);

        agent.shutdown().await;
        // Shutdown hands the unfinished job back.
        assert_eq!(&queue.queued_jobs().await.unwrap()[0].job.id, jid);
    }

    #[tokio::test]
    async fn rejects_invalid_name() {
        let grid = LocalProvider::default();
        let queue = BuildJobQueue::new(&grid, QueueConfig::default());
        let registry = AgentRegistry::new(&grid, RecentJobs::new(&grid, 1));
        let runner = JobRunner::new(queue.clone(), Arc::new(ProcessSandbox::new()), ContainerLimits::default());
        let settings = AgentSettings {
            name: "Not Valid".into(),
            ..AgentSettings::default()
        };
        assert!(BuildAgent::new(&settings, queue, registry, runner).is_err());
    }
}
