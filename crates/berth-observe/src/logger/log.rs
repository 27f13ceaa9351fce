use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

/// Identifier berth entries carry in the journal.
#[cfg(all(target_os = "linux", feature = "journald"))]
const SYSLOG_IDENTIFIER: &str = "berth";

type Output = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the global subscriber described by `cfg`.
///
/// Text and JSON lines go to stderr; stdout carries remote command output.
pub(crate) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = directives(&cfg.level)?;
    let output = match cfg.format {
        LoggerFormat::Text => stderr_text(cfg),
        LoggerFormat::Json => stderr_json(cfg),
        LoggerFormat::Journald => journal()?,
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()
        .map_err(|e| {
            if tracing::dispatcher::has_been_set() {
                LoggerError::AlreadyInitialized
            } else {
                LoggerError::InitializationFailed(e.to_string())
            }
        })
}

fn directives(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|e| LoggerError::InvalidLogLevel {
        directive: level.to_string(),
        reason: e.to_string(),
    })
}

fn local_rfc3339() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn stderr_text(cfg: &LoggerConfig) -> Output {
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_timer(local_rfc3339())
        .boxed()
}

fn stderr_json(cfg: &LoggerConfig) -> Output {
    fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_timer(local_rfc3339())
        .boxed()
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journal() -> Result<Output, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journal socket unavailable: {e}")))?
        .with_syslog_identifier(SYSLOG_IDENTIFIER.to_string());
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journal() -> Result<Output, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_directive_reports_reason() {
        let err = directives("berth=verbose").unwrap_err();
        match err {
            LoggerError::InvalidLogLevel { directive, reason } => {
                assert_eq!(directive, "berth=verbose");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accepts_target_directives() {
        assert!(directives("warn,berth.core=debug").is_ok());
    }

    #[cfg(not(all(target_os = "linux", feature = "journald")))]
    #[test]
    fn journal_needs_the_feature() {
        assert!(matches!(journal(), Err(LoggerError::JournaldNotSupported)));
    }
}
