//! tracing-subscriber setup for the library and the demo binary.
//!
//! Events come from two targets. `hierflow::boxing` logs one `info` per plan
//! built, a `warn` per unsupported edge and a `debug` per builder that
//! declined. `hierflow::actor` logs actor construction at `debug` and every
//! kernel launch at `trace`, with its duration.

use tracing_subscriber::{fmt, EnvFilter};

/// Directives used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Multi-line, with targets. The default.
    Pretty,
    /// One JSON object per event, span fields flattened in.
    Json,
    Compact,
}

impl LogFormat {
    /// Parse a format name, falling back to `Pretty` for anything unknown.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Filter for `directives`, e.g. `hierflow::boxing=debug,hierflow::actor=trace`.
/// Missing or unparsable directives give [`DEFAULT_FILTER`].
pub fn build_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_logging() {
    init_logging_with_format(LogFormat::Pretty);
}

/// Install the global subscriber, filtered by `RUST_LOG`.
///
/// A second call leaves the first subscriber in place.
pub fn init_logging_with_format(format: LogFormat) {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref());

    let _ = match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .flatten_event(true)
            .try_init(),
        // Targets are dropped here; boxing events carry `lbi` and actor
        // events carry `task_id`.
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .try_init(),
    };
}

/// Format from `HIERFLOW_LOG_FORMAT` (`json`, `compact`, else pretty).
pub fn init_logging_from_env() {
    let format = std::env::var("HIERFLOW_LOG_FORMAT")
        .map(|s| LogFormat::parse(&s))
        .unwrap_or(LogFormat::Pretty);

    init_logging_with_format(format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_filter_directives() {
        let filter = build_filter(Some("hierflow::boxing=debug"));
        assert_eq!(filter.to_string(), "hierflow::boxing=debug");

        assert_eq!(build_filter(None).to_string(), DEFAULT_FILTER);
        assert_eq!(build_filter(Some("hierflow=notalevel")).to_string(), DEFAULT_FILTER);
    }
}
