//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so a single run
//! can be made noisier without touching the settings file.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Default filter when neither `RUST_LOG` nor a configured level is usable.
pub const DEFAULT_LEVEL: &str = "info";

/// Build the env filter for `level`, letting `RUST_LOG` override it.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global tracing subscriber, writing to stderr.
///
/// Returns `false` if a subscriber was already installed (tests, or a
/// second call from the binary); that case is not an error.
pub fn init_logging(level: &str, json: bool) -> bool {
    let filter = build_filter(level);
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back() {
        // Must not panic on garbage input.
        let _filter = build_filter("[[not a filter");
    }

    #[test]
    fn second_init_reports_false() {
        let _ = init_logging("debug", false);
        assert!(!init_logging("debug", true));
    }
}
