use std::{path::Path, time::Duration};

use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use tokio::fs;

use crate::PodleaseResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the sandbox lease database
pub static SANDBOX_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/store/migrations/sandbox");

/// Maximum number of pooled connections to the lease database.
const MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a new SQLite database if it doesn't already exist at the specified path.
///
/// ## Arguments
///
/// * `db_path` - Path where the SQLite database file should be created
/// * `migrator` - SQLx migrator containing database schema migrations to run
pub async fn init_db(
    db_path: impl AsRef<Path>,
    migrator: &Migrator,
) -> PodleaseResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let pool = get_db_pool(db_path).await?;

    // Run migrations
    migrator.run(&pool).await?;

    Ok(pool)
}

/// Creates and returns a connection pool for SQLite database operations.
///
/// The database runs in WAL mode so the sweep can scan while single-row updates and deletes
/// from concurrent terminations commit.
pub async fn get_db_pool(db_path: impl AsRef<Path>) -> PodleaseResult<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Gets an existing database connection pool or creates a new one if the database doesn't exist.
///
/// ## Arguments
///
/// * `db_path` - Path to the SQLite database file
/// * `migrator` - SQLx migrator containing database schema migrations to run
pub async fn get_or_create_db_pool(
    db_path: impl AsRef<Path>,
    migrator: &Migrator,
) -> PodleaseResult<Pool<Sqlite>> {
    // Initialize the database if it doesn't exist
    init_db(&db_path, migrator).await
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_sandbox_db() -> PodleaseResult<()> {
        // Create temporary directory
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("pods.db");

        // Initialize database
        init_db(&db_path, &SANDBOX_DB_MIGRATOR).await?;
        assert!(db_path.exists(), "database file should have been created");

        // Test database connection
        let pool = get_db_pool(&db_path).await?;

        // Verify tables exist by querying them
        let tables = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await?;

        let table_names: Vec<String> = tables
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        assert!(
            table_names.contains(&"sandboxes".to_string()),
            "sandboxes table not found"
        );

        let indexes = sqlx::query("SELECT name FROM sqlite_master WHERE type='index'")
            .fetch_all(&pool)
            .await?;

        let index_names: Vec<String> = indexes
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        assert!(
            index_names.contains(&"idx_sandboxes_status_expires_at".to_string()),
            "expiry scan index not found"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_init_db_is_repeatable() -> PodleaseResult<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("pods.db");

        get_or_create_db_pool(&db_path, &SANDBOX_DB_MIGRATOR).await?;
        get_or_create_db_pool(&db_path, &SANDBOX_DB_MIGRATOR).await?;

        Ok(())
    }
}
