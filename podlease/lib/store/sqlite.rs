use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};

use crate::{
    clock::Clock,
    models::{NewSandbox, Sandbox, SandboxStatus},
    PodleaseError, PodleaseResult,
};

use super::{db, LeaseStore};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SANDBOX_COLUMNS: &str = "id, runtime_handle, owner_id, created_at, expires_at, status";

/// Shortest lease a row can carry. Keeps `expires_at > created_at` for zero-length leases.
const MIN_LEASE_MILLIS: i64 = 1;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`LeaseStore`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    /// The connection pool for the lease database.
    pool: Pool<Sqlite>,

    /// The clock used to stamp `created_at`.
    clock: Arc<dyn Clock>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SqliteLeaseStore {
    /// Creates a store over an already migrated pool.
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Opens (creating and migrating if needed) the lease database at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> PodleaseResult<Self> {
        let pool = db::get_or_create_db_pool(db_path, &db::SANDBOX_DB_MIGRATOR).await?;
        Ok(Self::new(pool, clock))
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn insert(&self, sandbox: NewSandbox) -> PodleaseResult<Sandbox> {
        let lease_millis = i64::try_from(sandbox.lease.as_millis()).map_err(|_| {
            PodleaseError::InvalidArgument(format!("lease too long: {:?}", sandbox.lease))
        })?;

        let created_at = self.clock.now().timestamp_millis();
        let expires_at = created_at
            .checked_add(lease_millis.max(MIN_LEASE_MILLIS))
            .ok_or_else(|| {
                PodleaseError::InvalidArgument(format!("lease too long: {:?}", sandbox.lease))
            })?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sandboxes (runtime_handle, owner_id, created_at, expires_at, status)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {SANDBOX_COLUMNS}
            "#
        ))
        .bind(&sandbox.runtime_handle)
        .bind(&sandbox.owner_id)
        .bind(created_at)
        .bind(expires_at)
        .bind(SandboxStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                PodleaseError::DuplicateRuntimeHandle(sandbox.runtime_handle.clone())
            }
            e => PodleaseError::from(e),
        })?;

        sandbox_from_row(&row)
    }

    async fn get(&self, id: i64, owner_id: &str) -> PodleaseResult<Option<Sandbox>> {
        let row = sqlx::query(&format!(
            "SELECT {SANDBOX_COLUMNS} FROM sandboxes WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(sandbox_from_row).transpose()
    }

    async fn get_by_id(&self, id: i64) -> PodleaseResult<Option<Sandbox>> {
        let row = sqlx::query(&format!(
            "SELECT {SANDBOX_COLUMNS} FROM sandboxes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(sandbox_from_row).transpose()
    }

    async fn update_status(&self, id: i64, status: SandboxStatus) -> PodleaseResult<bool> {
        if status == SandboxStatus::Stopped {
            return Err(PodleaseError::InvalidArgument(
                "stopped sandboxes are deleted, not updated".to_string(),
            ));
        }

        let result = sqlx::query("UPDATE sandboxes SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: i64) -> PodleaseResult<bool> {
        let result = sqlx::query("DELETE FROM sandboxes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expired_running(&self, now: DateTime<Utc>) -> PodleaseResult<Vec<Sandbox>> {
        let sql = format!(
            r#"
            SELECT {SANDBOX_COLUMNS} FROM sandboxes
            WHERE status = ? AND expires_at < ?
            ORDER BY expires_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(SandboxStatus::Running.as_str())
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(sandbox_from_row).collect()
    }

    async fn list_by_status(&self, status: SandboxStatus) -> PodleaseResult<Vec<Sandbox>> {
        let sql = format!(
            "SELECT {SANDBOX_COLUMNS} FROM sandboxes WHERE status = ? ORDER BY expires_at"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(sandbox_from_row).collect()
    }

    async fn list_by_owner(&self, owner_id: &str) -> PodleaseResult<Vec<Sandbox>> {
        let sql = format!("SELECT {SANDBOX_COLUMNS} FROM sandboxes WHERE owner_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(sandbox_from_row).collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn sandbox_from_row(row: &SqliteRow) -> PodleaseResult<Sandbox> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    let timestamp = |column: &str| -> PodleaseResult<DateTime<Utc>> {
        let millis: i64 = row.try_get(column)?;
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            PodleaseError::CorruptRecord {
                id,
                reason: format!("{column} out of range: {millis}"),
            }
        })
    };

    Ok(Sandbox {
        id,
        runtime_handle: row.try_get("runtime_handle")?,
        owner_id: row.try_get("owner_id")?,
        created_at: timestamp("created_at")?,
        expires_at: timestamp("expires_at")?,
        status: status.parse().map_err(|_| PodleaseError::CorruptRecord {
            id,
            reason: format!("unknown status {status:?}"),
        })?,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
