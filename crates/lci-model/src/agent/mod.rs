mod info;
pub use info::{AgentInfo, AgentStatus};
