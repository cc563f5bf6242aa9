//! Logging setup shared by the node binaries.
//!
//! Everything logs through `tracing`; [`init_logger`] installs the process-wide
//! subscriber once, in the format selected by [`LoggerConfig`].
mod config;
pub use config::LoggerConfig;

mod error;
pub use error::{LoggerError, LoggerResult};

mod format;
pub use format::LoggerFormat;

mod level;
pub use level::LoggerLevel;

mod timer;
pub use timer::UtcRfc3339;

mod init;

/// Installs the global subscriber.
///
/// ```rust
/// use lci_observe::{LoggerConfig, init_logger};
///
/// let cfg = LoggerConfig::default();
/// init_logger(&cfg).expect("logger");
/// tracing::info!(agent = "build-agent", "node starting");
/// ```
pub fn init_logger(cfg: &LoggerConfig) -> LoggerResult<()> {
    match cfg.format {
        LoggerFormat::Text => init::text(cfg),
        LoggerFormat::Json => init::json(cfg),
        LoggerFormat::Journald => init::journald(cfg),
    }
}
