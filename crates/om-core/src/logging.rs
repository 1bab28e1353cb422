//! Logging bootstrap for the emulator binary

/// Install the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` when set and defaults to `info`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
