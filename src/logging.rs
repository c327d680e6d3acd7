use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static TRACING_INIT: Once = Once::new();

/// Env var holding an `EnvFilter` directive, e.g. `budgeteer=debug`.
pub const LOG_ENV: &str = "BUDGETEER_LOG";

/// Installs the global subscriber once. Logs go to stderr so stdout stays
/// tab-separated.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("budgeteer=warn"));
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}
