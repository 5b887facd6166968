use std::{path::PathBuf, sync::LazyLock};

use crate::utils::PODLEASE_HOME_DIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default time between expiry sweeps, in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 2_000;

/// The image sandboxes run unless told otherwise.
pub const DEFAULT_IMAGE: &str = "python:3.8-slim";

/// The command sandboxes run unless told otherwise. Keeps the unit alive until stopped.
pub const DEFAULT_COMMAND: &str = "sleep infinity";

/// Seconds a unit gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

/// The path where all podlease global data is stored.
pub static DEFAULT_PODLEASE_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PODLEASE_HOME_DIR)
});
