use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "duel_store" => WARN).
    pub module_levels: Vec<(String, Level)>,
    /// Human-readable output instead of JSON lines.
    pub pretty: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            pretty: false,
        }
    }
}

impl TelemetryConfig {
    /// Directive string handed to `EnvFilter` when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.pretty {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Parse a level name such as "debug" or "WARN".
pub fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        assert_eq!(TelemetryConfig::default().filter_directives(), "info");
    }

    #[test]
    fn module_overrides_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("duel_server".into(), Level::DEBUG),
                ("duel_store".into(), Level::ERROR),
            ],
            pretty: true,
        };
        assert_eq!(
            config.filter_directives(),
            "warn,duel_server=debug,duel_store=error"
        );
    }

    #[test]
    fn parse_level_accepts_any_case() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }
}
