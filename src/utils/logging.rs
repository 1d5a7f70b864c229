// ============================================================================
// Logging Initialization
// Optional tracing subscriber for binaries and tests embedding the engine
// ============================================================================

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one event per block
    #[default]
    Pretty,
    /// Single line per event
    Compact,
}

/// Install a global subscriber. `RUST_LOG` controls the filter and defaults
/// to `info`. Thread names are included so matcher and announcer lines can
/// be told apart.
///
/// # Example
/// ```ignore
/// use symbol_matching_engine::utils::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Compact)?;
/// ```
pub fn init_logging(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact().with_thread_names(true))
            .try_init()?,
    }

    tracing::info!(format = ?format, "logging initialized");
    Ok(())
}
