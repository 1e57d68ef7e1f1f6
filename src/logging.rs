//! Tracing subscriber setup for the binary.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter directive for a CLI verbosity level.
///
/// `verbosity` is the number of `-v` flags; `quiet` wins over it.
pub fn filter_directive(verbosity: u8, quiet: bool) -> String {
    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    format!("warn,feedcast={level}")
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init(verbosity: u8, quiet: bool, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity, quiet)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity > 0),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_maps_to_levels() {
        assert_eq!(filter_directive(0, false), "warn,feedcast=info");
        assert_eq!(filter_directive(1, false), "warn,feedcast=debug");
        assert_eq!(filter_directive(2, false), "warn,feedcast=trace");
        assert_eq!(filter_directive(5, false), "warn,feedcast=trace");
    }

    #[test]
    fn test_quiet_overrides_verbosity() {
        assert_eq!(filter_directive(2, true), "warn,feedcast=warn");
    }

    #[test]
    fn test_directives_parse() {
        for v in 0..3 {
            assert!(EnvFilter::try_new(filter_directive(v, false)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(0, true, LogFormat::Text);
        init(1, false, LogFormat::Json);
    }
}
