use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing subscriber once per process.
///
/// Embedders that install their own subscriber can skip this; every
/// diagnostic the engine emits goes through `tracing` regardless.
pub fn init() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sfmprof=info"));

        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    });
}
