//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home where podlease keeps its state.
pub const PODLEASE_HOME_DIR: &str = ".podlease";

/// The lease database file name, relative to the podlease home.
pub const LEASE_DB_FILENAME: &str = "pods.db";

/// The configuration file name, relative to the podlease home.
pub const PODLEASE_CONFIG_FILENAME: &str = "podlease.toml";

/// The log directory, relative to the podlease home.
pub const LOG_SUBDIR: &str = "log";

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "podlease.log";
