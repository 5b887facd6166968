use std::{
    env,
    path::{Path, PathBuf},
};

use crate::config::DEFAULT_PODLEASE_HOME;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Overrides the podlease home directory.
pub const PODLEASE_HOME_ENV_VAR: &str = "PODLEASE_HOME";

/// Overrides the lease database path.
pub const PODLEASE_DATABASE_PATH_ENV_VAR: &str = "PODLEASE_DATABASE_PATH";

/// Overrides the sweep interval, in milliseconds.
pub const PODLEASE_SWEEP_INTERVAL_MS_ENV_VAR: &str = "PODLEASE_SWEEP_INTERVAL_MS";

/// Overrides the default sandbox image.
pub const PODLEASE_DEFAULT_IMAGE_ENV_VAR: &str = "PODLEASE_DEFAULT_IMAGE";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the podlease home directory, from `PODLEASE_HOME` if set.
pub fn podlease_home() -> PathBuf {
    match env::var(PODLEASE_HOME_ENV_VAR) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => DEFAULT_PODLEASE_HOME.clone(),
    }
}

/// Reads an environment variable, treating unset and empty alike.
pub fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Loads the first `.env` found in the current directory or its parents into the environment.
///
/// Returns the file that was read, or `None` if there is none. Variables already set are kept.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    found(dotenvy::dotenv())
}

/// Loads the env file at `path` into the environment, like [`load_dotenv`].
pub fn load_env_file(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    found(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn found(result: Result<PathBuf, dotenvy::Error>) -> Result<Option<PathBuf>, dotenvy::Error> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_env_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let missing = dir.path().join("absent.env");
        assert_eq!(load_env_file(&missing)?, None);

        let valid = dir.path().join("valid.env");
        std::fs::write(&valid, "PODLEASE_TEST_ENV_FILE_VALUE=from-file\n")?;
        assert_eq!(load_env_file(&valid)?, Some(valid.clone()));
        assert_eq!(
            env_var("PODLEASE_TEST_ENV_FILE_VALUE").as_deref(),
            Some("from-file")
        );

        let malformed = dir.path().join("malformed.env");
        std::fs::write(&malformed, "NOT A VALID LINE\n")?;
        assert!(load_env_file(&malformed).is_err());

        Ok(())
    }
}
