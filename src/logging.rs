use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{MixerError, Result};

/// Installs the global subscriber writing to stderr, keeping stdout for
/// command output. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) if !env.trim().is_empty() => EnvFilter::try_new(env),
        _ => EnvFilter::try_new(level),
    }
    .map_err(|e| MixerError::InvalidArgument(format!("invalid log level: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| MixerError::InvalidArgument("logging already initialized".into()))
}
