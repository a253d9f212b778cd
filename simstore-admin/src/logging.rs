/// Setup logging for the admin tool with structured tracing
///
/// Logs go to stderr; stdout carries command output.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).json())
        .init();

    tracing::debug!("simstore-admin logging initialized");
}
