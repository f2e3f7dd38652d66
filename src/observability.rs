//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable that switches log output to JSON.
pub const LOG_FORMAT_ENV: &str = "ACTOR_KERNEL_LOG_FORMAT";

/// Initialize tracing subscriber once for the process.
///
/// `RUST_LOG` overrides the configured level. Output is compact text unless
/// `json_logs` is set or `ACTOR_KERNEL_LOG_FORMAT=json`.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = env_filter(config);

        let result = if wants_json(config, std::env::var(LOG_FORMAT_ENV).ok().as_deref()) {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

fn wants_json(config: &ObservabilityConfig, format_env: Option<&str>) -> bool {
    config.json_logs || format_env.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
