//! Runtime client abstraction.
//!
//! Every operation separates "the unit legitimately does not exist" (a normal, idempotent
//! outcome) from "the runtime failed to answer" (an error that must not be mistaken for a
//! freed unit).

mod docker;

use std::fmt::{self, Display};

use async_trait::async_trait;

use crate::PodleaseResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Label attached to every unit so it can be traced back to its owner.
pub const OWNER_LABEL: &str = "user";

/// Prefix of every unit name.
pub const UNIT_NAME_PREFIX: &str = "pod";

/// Status string reported for a handle the runtime no longer knows about.
pub const NOT_FOUND_STATUS: &str = "not found";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A client for the runtime that hosts sandbox units.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Creates and starts a detached unit for `owner_id`, returning its handle.
    ///
    /// Fails with `RuntimeUnavailable` if the runtime cannot be reached and `ImageError` if
    /// the image cannot be resolved or started.
    async fn create(&self, owner_id: &str, image: &str, command: &[String])
        -> PodleaseResult<String>;

    /// Stops and removes the unit.
    ///
    /// Returns `Ok(false)` if the unit was already stopped or already removed. Any other
    /// runtime failure is an error and means nothing is known to have been freed.
    async fn stop(&self, handle: &str) -> PodleaseResult<bool>;

    /// Reports the state of the unit, or [`UnitStatus::NotFound`] if it no longer exists.
    async fn status(&self, handle: &str) -> PodleaseResult<UnitStatus>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The observed state of a runtime unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// The runtime has no unit with this handle.
    NotFound,

    /// The runtime's own state string, e.g. `running` or `exited`.
    State(String),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UnitStatus {
    /// Whether the unit still holds runtime resources and is expected to make progress.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::State(state) if matches!(
            state.as_str(),
            "running" | "created" | "restarting" | "paused"
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a globally unique unit name for `owner_id`.
///
/// Characters the runtime does not accept in names are replaced with `-`.
pub fn unit_name(owner_id: &str) -> String {
    let owner: String = owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    format!("{}_{}_{}", UNIT_NAME_PREFIX, owner, uuid::Uuid::new_v4())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "{}", NOT_FOUND_STATUS),
            Self::State(state) => write!(f, "{}", state),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
