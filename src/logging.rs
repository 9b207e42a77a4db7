//! Tracing subscriber setup.

use std::collections::HashMap;
use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"hyroute_acl": "debug", "hickory_proto": "warn"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl LoggingConfig {
    /// Filter directive string: base level followed by per-module overrides.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.level.as_deref().unwrap_or("info").to_string();
        let mut modules: Vec<_> = self.filters.iter().collect();
        modules.sort();
        for (module, level) in modules {
            filter_str.push(',');
            filter_str.push_str(module);
            filter_str.push('=');
            filter_str.push_str(level);
        }
        filter_str
    }
}

/// Install the global tracing subscriber.
///
/// An invalid filter falls back to `info`. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");
    let registry = tracing_subscriber::registry().with(filter);

    match (format, output) {
        ("json", "stdout") => registry
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init(),
        ("json", _) => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        ("compact", "stdout") => registry
            .with(fmt::layer().compact().with_writer(io::stdout))
            .try_init(),
        ("compact", _) => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
        (_, "stdout") => registry
            .with(fmt::layer().pretty().with_writer(io::stdout))
            .try_init(),
        _ => registry
            .with(fmt::layer().pretty().with_writer(io::stderr))
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_filters() {
        let config: LoggingConfig = serde_yaml::from_str(
            "{level: warn, filters: {hyroute_acl: debug, hickory_proto: error}}",
        )
        .unwrap();
        assert_eq!(
            config.filter_directives(),
            "warn,hickory_proto=error,hyroute_acl=debug"
        );
        assert_eq!(LoggingConfig::default().filter_directives(), "info");
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig {
            format: Some("compact".into()),
            ..LoggingConfig::default()
        };
        // Another test in this binary may have installed one first.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
