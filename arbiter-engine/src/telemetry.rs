//! Tracing subscriber setup

use arbiter_core::{ArbiterError, ArbiterResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_LOG_FILTER: &str = "arbiter_engine=debug,arbiter_llm=info,info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `ARBITER_LOG_FORMAT` ("json" or anything else for pretty).
    pub fn from_env() -> Self {
        Self::parse(std::env::var("ARBITER_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber, logging to stderr. Call once at
/// startup.
pub fn init_tracing(format: LogFormat) -> ArbiterResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| {
        ArbiterError::Config(ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: format!("{:?}", format),
            reason: format!("Failed to init subscriber: {}", e),
        })
    })?;

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }

    #[test]
    fn test_second_init_fails() {
        // Either this call or an earlier one in the process installed the
        // global subscriber; the next call must report it.
        let _ = init_tracing(LogFormat::Pretty);
        assert!(matches!(
            init_tracing(LogFormat::Json),
            Err(ArbiterError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
