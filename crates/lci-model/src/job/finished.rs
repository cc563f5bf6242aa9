use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AgentId, JobDescriptor, JobFailure, JobStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One captured output line of a sandbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub stream: LogStream,
    pub line: String,
}

/// Terminal record of a job.
///
/// Completed, failed and cancelled jobs share this shape; only `status` and
/// `failure` differ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedJob {
    pub job: JobDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<BuildLogEntry>,
    /// Lines dropped because the log buffer overflowed.
    #[serde(default)]
    pub dropped_log_lines: u64,
}

impl FinishedJob {
    fn terminal(job: JobDescriptor, status: JobStatus) -> Self {
        Self {
            job,
            agent: None,
            status,
            failure: None,
            started_at: None,
            finished_at: OffsetDateTime::now_utc(),
            logs: Vec::new(),
            dropped_log_lines: 0,
        }
    }

    pub fn completed(job: JobDescriptor) -> Self {
        Self::terminal(job, JobStatus::Completed)
    }

    pub fn cancelled(job: JobDescriptor) -> Self {
        Self::terminal(job, JobStatus::Cancelled)
    }

    pub fn failed(job: JobDescriptor, failure: JobFailure) -> Self {
        let mut out = Self::terminal(job, JobStatus::Failed);
        out.failure = Some(failure);
        out
    }

    pub fn on_agent(mut self, agent: AgentId, started_at: OffsetDateTime) -> Self {
        self.agent = Some(agent);
        self.started_at = Some(started_at);
        self
    }

    pub fn with_logs(mut self, logs: Vec<BuildLogEntry>, dropped: u64) -> Self {
        self.logs = logs;
        self.dropped_log_lines = dropped;
        self
    }

    /// Wall-clock run time, if the job ever started.
    pub fn duration(&self) -> Option<std::time::Duration> {
        let started = self.started_at?;
        let d = self.finished_at - started;
        d.try_into().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceRequirements;

    #[test]
    fn failed_carries_reason() {
        let job = JobDescriptor::new("c", ResourceRequirements::default());
        let f = FinishedJob::failed(job, JobFailure::MaxRetriesExceeded { retries: 6 });
        assert_eq!(f.status, JobStatus::Failed);
        assert!(f.duration().is_none());
        assert!(matches!(
            f.failure,
            Some(JobFailure::MaxRetriesExceeded { retries: 6 })
        ));
    }

    #[test]
    fn duration_from_start() {
        let job = JobDescriptor::new("c", ResourceRequirements::default());
        let started = OffsetDateTime::now_utc() - std::time::Duration::from_secs(3);
        let f = FinishedJob::completed(job).on_agent(AgentId::from("a"), started);
        let d = f.duration().unwrap();
        assert!(d >= std::time::Duration::from_secs(3));
    }
}
