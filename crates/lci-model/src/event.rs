use serde::{Deserialize, Serialize};

use crate::{AgentId, FinishedJob, JobId};

/// Change notification published on the registry topic.
///
/// Carries just enough for a dashboard to decide what to re-fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RegistryEvent {
    /// The queue contents changed (enqueue, cancel, requeue).
    QueueChanged,
    /// A job moved from the queue to an agent.
    Claimed { job: JobId, agent: AgentId },
    /// A job reached a terminal state.
    Finished(Box<FinishedJob>),
    /// A running job went back to the queue.
    Requeued { job: JobId, retry_count: u32 },
    /// The agent set or an agent's state changed.
    AgentsChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_representation() {
        let ev = RegistryEvent::Requeued {
            job: JobId::from("j"),
            retry_count: 1,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "requeued");
        assert_eq!(v["retryCount"], 1);

        let back: RegistryEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }
}
