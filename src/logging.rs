//! Structured logging setup.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the default level ("info").
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Initialize tracing with an explicit default level, overridable via
/// `RUST_LOG`.
pub fn init_tracing_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("arb_engine={level},{level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();
}
