//! Durable lease records for every sandbox.
//!
//! The lease store is the source of truth for whether a sandbox is still supposed to be
//! running. Timers and sweeps only ever act on what the store says.

mod db;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{NewSandbox, Sandbox, SandboxStatus},
    PodleaseResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use sqlite::*;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Persistence for sandbox leases.
///
/// Every mutation is atomic at the granularity of a single row, and every scan is a single
/// consistent read: a row deleted mid-scan never reappears and a row updated mid-scan shows up
/// in either its old or new state.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Inserts a `running` row. The store assigns `id` and `created_at`, and derives
    /// `expires_at` from the lease.
    async fn insert(&self, sandbox: NewSandbox) -> PodleaseResult<Sandbox>;

    /// Looks up a sandbox that belongs to `owner_id`.
    async fn get(&self, id: i64, owner_id: &str) -> PodleaseResult<Option<Sandbox>>;

    /// Looks up a sandbox regardless of owner.
    async fn get_by_id(&self, id: i64) -> PodleaseResult<Option<Sandbox>>;

    /// Sets the status of a sandbox. Returns `false` if the row does not exist.
    async fn update_status(&self, id: i64, status: SandboxStatus) -> PodleaseResult<bool>;

    /// Deletes a sandbox. Returns `false` if the row was already gone.
    async fn delete(&self, id: i64) -> PodleaseResult<bool>;

    /// Returns every `running` sandbox whose lease ended before `now`.
    async fn list_expired_running(&self, now: DateTime<Utc>) -> PodleaseResult<Vec<Sandbox>>;

    /// Returns every sandbox in `status`.
    async fn list_by_status(&self, status: SandboxStatus) -> PodleaseResult<Vec<Sandbox>>;

    /// Returns every sandbox owned by `owner_id`.
    async fn list_by_owner(&self, owner_id: &str) -> PodleaseResult<Vec<Sandbox>>;
}
