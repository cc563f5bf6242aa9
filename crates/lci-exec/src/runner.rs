use std::{process::Stdio, sync::Arc, time::Duration};

use lci_core::{BuildJobQueue, MetricsHandle, noop_metrics};
use lci_model::{BuildLogEntry, FinishedJob, JobFailure, LogStream, RunningJob};
use time::OffsetDateTime;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    ContainerLimits, LogBuffer, LogConfig, MaxLimits, build_cgroup_name,
    sandbox::{Sandbox, SandboxLaunch},
};

const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How one execution ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Terminal state to report to the queue.
    Finished(Box<FinishedJob>),
    /// The running entry vanished or moved to another agent; nothing to report.
    Lost,
    /// Stopped locally (pause grace expired or shutdown); the job was handed back.
    Interrupted,
}

/// Why the wait loop stopped the sandbox.
enum Stop {
    Cancelled,
    Lost,
    Interrupted,
}

/// Runs claimed jobs in a sandbox and turns the result into a [`FinishedJob`].
#[derive(Clone)]
pub struct JobRunner {
    queue: BuildJobQueue,
    sandbox: Arc<dyn Sandbox>,
    defaults: ContainerLimits,
    max: MaxLimits,
    logs: LogConfig,
    cancel_poll: Duration,
    metrics: MetricsHandle,
}

impl JobRunner {
    pub fn new(queue: BuildJobQueue, sandbox: Arc<dyn Sandbox>, defaults: ContainerLimits) -> Self {
        Self {
            queue,
            sandbox,
            defaults,
            max: MaxLimits::default(),
            logs: LogConfig::default(),
            cancel_poll: Duration::from_secs(1),
            metrics: noop_metrics(),
        }
    }

    pub fn with_max_limits(mut self, max: MaxLimits) -> Self {
        self.max = max;
        self
    }

    pub fn with_log_config(mut self, logs: LogConfig) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_cancel_poll(mut self, every: Duration) -> Self {
        self.cancel_poll = every.max(Duration::from_millis(1));
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Execute `running` and report its terminal state to the queue.
    pub async fn run_and_report(&self, running: RunningJob, stop: CancellationToken) -> RunOutcome {
        let outcome = self.execute(running, stop).await;
        if let RunOutcome::Finished(finished) = &outcome {
            match self.queue.finish_job(finished.as_ref().clone()).await {
                Ok(true) => {}
                Ok(false) => debug!(job = %finished.job.id, "result superseded by a requeue"),
                Err(e) => warn!(job = %finished.job.id, error = %e, "failed to report job result"),
            }
        }
        outcome
    }

    /// Execute `running` until it exits, is cancelled, is lost, or `stop` fires.
    #[instrument(level = "info", skip_all, fields(job = %running.job.id, agent = %running.agent))]
    pub async fn execute(&self, running: RunningJob, stop: CancellationToken) -> RunOutcome {
        let started = OffsetDateTime::now_utc();
        let kind = self.sandbox.kind();
        let limits = self.defaults.for_job(&running.job.resources, &self.max);
        // Also the container name: keep it to [a-zA-Z0-9-].
        let name: String = build_cgroup_name(
            running.agent.as_str(),
            running.job.id.as_str(),
            started.unix_timestamp_nanos() as u64,
        )
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
        let launch = SandboxLaunch::for_job(name, &running.job, limits);

        let child = self
            .sandbox
            .command(&launch)
            .and_then(|mut cmd| {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                Ok(cmd.spawn()?)
            });
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "sandbox launch failed");
                self.metrics.record_sandbox_error(kind, "launch");
                self.sandbox.cleanup(&launch).await;
                return self.finished(
                    FinishedJob::failed(running.job.clone(), JobFailure::Launch { message: e.to_string() }),
                    &running,
                    Vec::new(),
                    0,
                );
            }
        };
        self.metrics.record_job_started(kind);
        info!(sandbox = kind, "job started");

        let (tx, mut rx) = mpsc::channel(256);
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, LogStream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, LogStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut logs = LogBuffer::new(running.job.id.clone(), self.logs);
        let waited = self.wait(&running, &launch, &mut child, &mut rx, &mut logs, &stop).await;

        // Readers end at EOF once the sandbox is gone, unless a stray
        // background process still holds the pipe.
        let drain = async {
            while let Some((stream, line)) = rx.recv().await {
                logs.push(stream, &line);
            }
        };
        if tokio::time::timeout(LOG_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("sandbox output still open after exit; dropping the rest");
        }
        self.sandbox.cleanup(&launch).await;
        let (lines, dropped) = logs.into_parts();

        match waited {
            Ok(status) => {
                let finished = match status.code() {
                    Some(0) => FinishedJob::completed(running.job.clone()),
                    Some(code) if self.sandbox.is_launch_failure(code) => {
                        self.metrics.record_sandbox_error(kind, "launch");
                        FinishedJob::failed(
                            running.job.clone(),
                            JobFailure::Launch {
                                message: last_stderr(&lines)
                                    .unwrap_or_else(|| format!("sandbox exited with {code}")),
                            },
                        )
                    }
                    code => FinishedJob::failed(
                        running.job.clone(),
                        JobFailure::Execution {
                            exit_code: code,
                            message: match code {
                                Some(c) => format!("script exited with code {c}"),
                                None => "script terminated by signal".into(),
                            },
                        },
                    ),
                };
                self.finished(finished, &running, lines, dropped)
            }
            Err(Stop::Cancelled) => {
                info!("job cancelled");
                self.finished(FinishedJob::cancelled(running.job.clone()), &running, lines, dropped)
            }
            Err(Stop::Lost) => {
                warn!("job no longer assigned to this agent; sandbox killed");
                RunOutcome::Lost
            }
            Err(Stop::Interrupted) => {
                info!("job interrupted");
                RunOutcome::Interrupted
            }
        }
    }

    async fn wait(
        &self,
        running: &RunningJob,
        launch: &SandboxLaunch,
        child: &mut Child,
        rx: &mut mpsc::Receiver<(LogStream, String)>,
        logs: &mut LogBuffer,
        stop: &CancellationToken,
    ) -> Result<std::process::ExitStatus, Stop> {
        let mut poll = tokio::time::interval(self.cancel_poll);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.tick().await;

        let reason = loop {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => return Ok(status),
                    Err(e) => {
                        warn!(error = %e, "lost track of sandbox process");
                        self.metrics.record_sandbox_error(self.sandbox.kind(), "wait");
                        break Stop::Lost;
                    }
                },
                Some((stream, line)) = rx.recv() => logs.push(stream, &line),
                _ = stop.cancelled() => break Stop::Interrupted,
                _ = poll.tick() => match self.queue.running_job(&running.job.id).await {
                    Ok(Some(current)) if !current.is_owned_by(&running.agent) => break Stop::Lost,
                    Ok(Some(current)) if current.cancelled => break Stop::Cancelled,
                    Ok(Some(_)) => {}
                    Ok(None) => break Stop::Lost,
                    // Keep running while the grid is away; cancellation is advisory.
                    Err(e) => debug!(error = %e, "cancel check skipped"),
                },
            }
        };

        if let Err(e) = self.sandbox.kill(launch, child).await {
            warn!(error = %e, "failed to kill sandbox");
            self.metrics.record_sandbox_error(self.sandbox.kind(), "kill");
        }
        if let Err(e) = child.wait().await {
            debug!(error = %e, "wait after kill failed");
        }
        Err(reason)
    }

    fn finished(
        &self,
        finished: FinishedJob,
        running: &RunningJob,
        lines: Vec<BuildLogEntry>,
        dropped: u64,
    ) -> RunOutcome {
        let finished = finished
            .on_agent(running.agent.clone(), running.started_at)
            .with_logs(lines, dropped);
        let duration_ms = finished
            .duration()
            .map_or(0, |d| d.as_millis().min(u128::from(u64::MAX)) as u64);
        self.metrics
            .record_job_finished(self.sandbox.kind(), finished.status, duration_ms);
        info!(status = %finished.status, duration_ms, "job finished");
        RunOutcome::Finished(Box::new(finished))
    }
}

async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::Sender<(LogStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(?stream, error = %e, "sandbox output unreadable");
                break;
            }
        }
    }
}

fn last_stderr(lines: &[BuildLogEntry]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find(|l| l.stream == LogStream::Stderr)
        .map(|l| l.line.clone())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use lci_core::QueueConfig;
    use lci_grid::LocalProvider;
    use lci_model::{AgentId, JobDescriptor, JobStatus, ResourceRequirements};
    use tokio::process::Command;

    use super::*;
    use crate::{ExecError, ProcessSandbox};

    fn runner(grid: &LocalProvider, sandbox: Arc<dyn Sandbox>) -> (JobRunner, BuildJobQueue) {
        let queue = BuildJobQueue::new(grid, QueueConfig::default());
        let runner = JobRunner::new(queue.clone(), sandbox, ContainerLimits::default())
            .with_cancel_poll(Duration::from_millis(20));
        (runner, queue)
    }

    async fn claimed(queue: &BuildJobQueue, steps: &[&str]) -> RunningJob {
        let job = JobDescriptor::new(
            "c",
            ResourceRequirements::script("unused", steps.iter().map(|s| s.to_string()).collect()),
        );
        queue.enqueue(job).await.unwrap();
        queue.claim_next(&AgentId::from("a"), 1).await.unwrap().remove(0)
    }

    fn finished(outcome: RunOutcome) -> FinishedJob {
        match outcome {
            RunOutcome::Finished(f) => *f,
            other => panic!("expected a finished job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_script_completes_with_logs() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(ProcessSandbox::new()));
        let running = claimed(&queue, &["echo hello", "echo warn >&2"]).await;

        let done = finished(runner.run_and_report(running.clone(), CancellationToken::new()).await);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.agent, Some(AgentId::from("a")));
        assert!(done.logs.iter().any(|l| l.line == "hello" && l.stream == LogStream::Stdout));
        assert!(done.logs.iter().any(|l| l.line == "warn" && l.stream == LogStream::Stderr));
        assert!(queue.running_job(&running.job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_execution_failure() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(ProcessSandbox::new()));
        let running = claimed(&queue, &["exit 3", "echo unreachable"]).await;

        let done = finished(runner.execute(running, CancellationToken::new()).await);
        assert_eq!(done.status, JobStatus::Failed);
        assert!(matches!(
            done.failure,
            Some(JobFailure::Execution { exit_code: Some(3), .. })
        ));
        assert!(done.logs.is_empty());
    }

    #[tokio::test]
    async fn cancel_flag_kills_sandbox_and_reports_cancelled() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(ProcessSandbox::new()));
        let running = claimed(&queue, &["sleep 30"]).await;

        let id = running.job.id.clone();
        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.execute(running, CancellationToken::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.cancel_build_job(&id).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        assert_eq!(finished(outcome).status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn requeued_job_is_lost_and_not_reported() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(ProcessSandbox::new()));
        let running = claimed(&queue, &["sleep 30"]).await;

        let task = tokio::spawn({
            let runner = runner.clone();
            let running = running.clone();
            async move { runner.run_and_report(running, CancellationToken::new()).await }
        });
        queue.requeue_on_agent_loss(&running.agent).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Lost));
        assert_eq!(queue.queued_jobs().await.unwrap()[0].job.retry_count, 1);
    }

    struct Unlaunchable;

    #[async_trait]
    impl Sandbox for Unlaunchable {
        fn kind(&self) -> &'static str {
            "broken"
        }

        fn command(&self, _: &SandboxLaunch) -> Result<Command, ExecError> {
            Ok(Command::new("/nonexistent/lci-sandbox"))
        }

        async fn kill(&self, _: &SandboxLaunch, child: &mut Child) -> Result<(), ExecError> {
            child.start_kill()?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn launch_failure_is_reported_as_failed_job() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(Unlaunchable));
        let running = claimed(&queue, &["true"]).await;

        let done = finished(runner.run_and_report(running.clone(), CancellationToken::new()).await);
        assert_eq!(done.status, JobStatus::Failed);
        assert!(matches!(done.failure, Some(JobFailure::Launch { .. })));
        assert!(queue.running_job(&running.job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_token_interrupts_without_report() {
        let grid = LocalProvider::default();
        let (runner, queue) = runner(&grid, Arc::new(ProcessSandbox::new()));
        let running = claimed(&queue, &["sleep 30"]).await;
        let stop = CancellationToken::new();
        stop.cancel();

        let outcome = runner.run_and_report(running.clone(), stop).await;
        assert!(matches!(outcome, RunOutcome::Interrupted));
        assert!(queue.running_job(&running.job.id).await.unwrap().is_some());
    }
}
