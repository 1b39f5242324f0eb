//! Logging setup.
//!
//! Noisy transport crates are pinned to `warn` so engine events stay
//! readable. `RUST_LOG`, when set, replaces the whole filter.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Modules that log connection-level chatter at debug/trace
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "tokio_util"];

fn filter_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(filter_directives(log_level))
}

/// Install the global subscriber. `log_format` is "json" or anything else
/// for human-readable output. Calling twice is harmless.
pub fn init_logging(log_level: &str, log_format: &str) {
    let registry = tracing_subscriber::registry().with(build_filter(log_level));

    if log_format == "json" {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);
        let _ = registry.with(layer).try_init();
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(false);
        let _ = registry.with(layer).try_init();
    }
}
