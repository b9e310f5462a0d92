//! Shared helpers for queue integration tests.

/// Install a fmt subscriber once so RUST_LOG surfaces queue events.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
