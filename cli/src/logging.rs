//! Tracing initialisation for the `chainmirror` binary.

use chainmirror_core::config::LogConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directives: `"info,chainmirror_core=debug,sqlx=warn"`.
pub fn directives(config: &LogConfig, sql_debug: bool) -> String {
    let mut directives = config.level.clone();
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives.push_str(if sql_debug { ",sqlx=debug" } else { ",sqlx=warn" });
    directives
}

/// Initialise tracing once at startup.
pub fn init_tracing(config: &LogConfig, sql_debug: bool) {
    let filter = EnvFilter::try_new(directives(config, sql_debug))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}
