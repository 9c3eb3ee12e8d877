use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. No OpenTelemetry exporter pipeline: unlike the
/// distributed Trino query tracing this crate's logging bootstrap was modeled on, there is no
/// downstream trace collector named anywhere in this controller's contract, only the structured
/// console logs every `#[instrument]`ed operation already produces.
pub fn init() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
