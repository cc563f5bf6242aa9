mod descriptor;
pub use descriptor::{JobDescriptor, ResourceRequirements};

mod entry;
pub use entry::{QueueEntry, RunningJob};

mod status;
pub use status::{JobFailure, JobStatus};

mod finished;
pub use finished::{BuildLogEntry, FinishedJob, LogStream};
