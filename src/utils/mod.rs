// ============================================================================
// Utilities Module
// Thread placement and logging setup
// ============================================================================

mod affinity;
#[cfg(feature = "logging")]
mod logging;

pub use affinity::{available_cores, pin_current_thread};
#[cfg(feature = "logging")]
pub use logging::{init_logging, LogFormat};
