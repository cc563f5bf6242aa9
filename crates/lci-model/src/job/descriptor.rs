use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{CourseId, Env, JobId};

/// One build request as produced by the push-event side.
///
/// Everything except `retry_count` is fixed once the job has been enqueued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub id: JobId,
    /// Human readable label shown in dashboards.
    #[serde(default)]
    pub name: String,
    /// Owning course/repository. Opaque to the orchestration core.
    pub course: CourseId,
    #[serde(default)]
    pub repository: String,
    /// Lower is more urgent.
    #[serde(default)]
    pub priority: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl JobDescriptor {
    /// Build a descriptor with a fresh id, default priority and no retries.
    pub fn new(course: impl Into<CourseId>, resources: ResourceRequirements) -> Self {
        Self {
            id: JobId::generate(),
            name: String::new(),
            course: course.into(),
            repository: String::new(),
            priority: 0,
            submitted_at: OffsetDateTime::now_utc(),
            retry_count: 0,
            resources,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Copy of this descriptor with the retry counter advanced by one.
    pub fn retried(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = next.retry_count.saturating_add(1);
        next
    }
}

/// What the sandbox has to run and the resources the job asks for.
///
/// `cpus`, `memory_mb` and `memory_swap_mb` are requests: the executing node clamps
/// them to its own maxima and falls back to its defaults when absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Container image the steps run in.
    #[serde(default)]
    pub image: String,
    /// Shell snippets executed in order; the first failing step fails the job.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Env::is_empty")]
    pub env: Env,
    #[serde(default)]
    pub network_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swap_mb: Option<u64>,
}

impl ResourceRequirements {
    pub fn script(image: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            image: image.into(),
            steps,
            ..Self::default()
        }
    }

    /// Join all steps into one `sh -c` script that stops at the first failure.
    pub fn joined_script(&self) -> String {
        let mut script = String::from("set -e\n");
        for step in &self.steps {
            script.push_str(step);
            script.push('\n');
        }
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retried_only_bumps_retry_count() {
        let job = JobDescriptor::new("course-1", ResourceRequirements::default()).with_priority(3);
        let next = job.retried();
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.id, job.id);
        assert_eq!(next.priority, 3);
        assert_eq!(next.submitted_at, job.submitted_at);
    }

    #[test]
    fn joined_script_sets_errexit() {
        let r = ResourceRequirements::script("alpine", vec!["echo a".into(), "echo b".into()]);
        assert_eq!(r.joined_script(), "set -e\necho a\necho b\n");
    }

    #[test]
    fn deserializes_minimal_camel_case_payload() {
        let json = r#"{
            "id": "j1",
            "course": "c1",
            "submittedAt": "2024-05-01T10:00:00Z",
            "resources": { "image": "alpine", "steps": ["true"], "memoryMb": 512 }
        }"#;
        let job: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(job.id.as_str(), "j1");
        assert_eq!(job.priority, 0);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.resources.memory_mb, Some(512));
        assert!(job.resources.cpus.is_none());
    }
}
