//! Lease store models for podlease.

use std::{
    fmt::{self, Display},
    str::FromStr,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PodleaseError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A sandbox is a leased runtime unit tracked by podlease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sandbox {
    /// The unique identifier for the sandbox.
    pub id: i64,

    /// The identifier the runtime returned when the unit was created.
    pub runtime_handle: String,

    /// The principal that requested the sandbox.
    pub owner_id: String,

    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,

    /// When the lease on the sandbox runs out.
    pub expires_at: DateTime<Utc>,

    /// The status of the sandbox.
    pub status: SandboxStatus,
}

/// The persisted status of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// The unit is expected to be running until `expires_at`.
    Running,

    /// The unit has been stopped and removed. Rows never stay in this state.
    Stopped,

    /// Reclamation did not complete and needs operator attention.
    Error,
}

/// The data needed to insert a new sandbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSandbox {
    /// The identifier returned by the runtime.
    pub runtime_handle: String,

    /// The principal that requested the sandbox.
    pub owner_id: String,

    /// How long the sandbox may run, measured from its creation time.
    pub lease: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Sandbox {
    /// Whether the lease has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

impl SandboxStatus {
    /// Returns the string stored in the lease store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl NewSandbox {
    /// Creates a new row description.
    pub fn new(
        runtime_handle: impl Into<String>,
        owner_id: impl Into<String>,
        lease: Duration,
    ) -> Self {
        Self {
            runtime_handle: runtime_handle.into(),
            owner_id: owner_id.into(),
            lease,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SandboxStatus {
    type Err = PodleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(PodleaseError::InvalidArgument(format!(
                "unknown sandbox status: {other}"
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
