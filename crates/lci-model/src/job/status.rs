use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable lowercase label, used as a metrics label value.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(ModelError::UnknownJobStatus(other.to_string())),
        }
    }
}

/// Why a job ended in [`JobStatus::Failed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobFailure {
    /// The script ran and exited non-zero.
    Execution { exit_code: Option<i32>, message: String },
    /// The sandbox could not be started.
    Launch { message: String },
    /// The job was requeued too often and is not retried again.
    MaxRetriesExceeded { retries: u32 },
}

impl JobFailure {
    /// Short reason text shown next to the status.
    pub fn reason(&self) -> String {
        match self {
            JobFailure::Execution { exit_code: Some(code), message } => {
                format!("exited with code {code}: {message}")
            }
            JobFailure::Execution { exit_code: None, message } => {
                format!("terminated by signal: {message}")
            }
            JobFailure::Launch { message } => format!("sandbox launch failed: {message}"),
            JobFailure::MaxRetriesExceeded { retries } => {
                format!("max retries exceeded after {retries} attempts")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_both_spellings() {
        assert_eq!("Cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert_eq!("canceled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!(matches!(
            "exploded".parse::<JobStatus>(),
            Err(ModelError::UnknownJobStatus(_))
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn max_retries_reason_is_distinct_from_execution() {
        let a = JobFailure::MaxRetriesExceeded { retries: 5 }.reason();
        let b = JobFailure::Execution {
            exit_code: Some(1),
            message: "boom".into(),
        }
        .reason();
        assert!(a.contains("max retries"));
        assert!(!b.contains("max retries"));
    }

    #[test]
    fn failure_is_internally_tagged() {
        let json = serde_json::to_value(JobFailure::Launch { message: "x".into() }).unwrap();
        assert_eq!(json["kind"], "launch");
    }
}
