//! Logging initialization.
//!
//! Controlled by environment variables:
//! - `TFMERGE_LOG` (falling back to `RUST_LOG`): an `EnvFilter` directive,
//!   default `warn`.
//! - `TFMERGE_LOG_FORMAT=json`: JSON events instead of the human format.
//!
//! Everything goes to stderr so the merged state can be written to stdout.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Output format for log events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines.
    Text,
    /// One JSON object per event, with span close events.
    Json,
}

impl LogFormat {
    /// Read the format from `TFMERGE_LOG_FORMAT`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var("TFMERGE_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Build the filter from `TFMERGE_LOG`, then `RUST_LOG`, then `default`.
fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env("TFMERGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// `verbose` raises the default level to `info` (still overridden by the
/// environment). Calling this twice is harmless; the second call is ignored.
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let registry = tracing_subscriber::registry().with(filter(default));

    let result = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("tracing already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parse() {
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Text);
    }

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
