use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{LoggerConfig, LoggerError, LoggerResult, UtcRfc3339};

pub(crate) fn text(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = fmt::layer()
        .with_ansi(cfg.should_use_color())
        .with_target(cfg.with_targets)
        .with_timer(UtcRfc3339);
    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()?).with(layer))
}

pub(crate) fn json(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_timer(UtcRfc3339);
    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()?).with(layer))
}

#[cfg(target_os = "linux")]
pub(crate) fn journald(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::JournaldInitFailed(e.to_string()))?
        .with_syslog_identifier("lci-agentd".into());
    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()?).with(layer))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn journald(_cfg: &LoggerConfig) -> LoggerResult<()> {
    Err(LoggerError::JournaldNotSupported)
}

fn install<S>(subscriber: S) -> LoggerResult<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|_| LoggerError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoggerFormat;

    // One test installs the global subscriber; the second call must fail cleanly.
    #[test]
    fn second_init_reports_already_initialized() {
        let cfg = LoggerConfig {
            use_color: false,
            ..LoggerConfig::default()
        };
        let first = crate::init_logger(&cfg);
        assert!(first.is_ok() || matches!(first, Err(LoggerError::AlreadyInitialized)));

        let again = LoggerConfig {
            format: LoggerFormat::Json,
            ..cfg
        };
        assert!(matches!(crate::init_logger(&again), Err(LoggerError::AlreadyInitialized)));
    }

    #[test]
    #[cfg(not(target_os = "linux"))]
    fn journald_unsupported_off_linux() {
        assert!(matches!(
            journald(&LoggerConfig::default()),
            Err(LoggerError::JournaldNotSupported)
        ));
    }
}
