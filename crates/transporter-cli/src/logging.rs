use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for the CLI.
///
/// `RUST_LOG` takes precedence when present; otherwise the filter
/// comes from the `--log-level` flag.
pub fn init(fallback_level: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::new(fallback_level),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
