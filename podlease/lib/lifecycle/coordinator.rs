use std::sync::Arc;

use serde::Serialize;

use crate::{
    models::SandboxStatus, runtime::RuntimeClient, store::LeaseStore, PodleaseError,
    PodleaseResult,
};

use super::inflight::{Claim, InFlightRegistry, SharedOutcome};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a caller does when a termination for the same sandbox is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Wait for the running termination and report its outcome.
    Wait,

    /// Return [`PodleaseError::AlreadyTerminating`] straight away.
    Reject,
}

/// The successful end of a termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminationOutcome {
    /// The unit was stopped and removed, and the lease row deleted.
    Reclaimed {
        /// The sandbox that was reclaimed.
        sandbox_id: i64,

        /// Whether the runtime still had the unit running when it was stopped.
        unit_found: bool,
    },

    /// No lease row existed, so there was nothing to do.
    AlreadyGone {
        /// The sandbox that was asked for.
        sandbox_id: i64,
    },
}

/// A termination failure in a form that can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TerminationFailure {
    RuntimeUnavailable(String),
    RuntimeApi(String),
    Store(String),
    Other(String),
}

/// Serializes stop and reclamation of sandboxes.
///
/// At most one termination sequence runs per sandbox id at any time, no matter how many
/// timers, sweeps and manual requests ask for it. The sequence itself runs on its own task, so
/// a caller that goes away mid-way cannot leave a unit stopped with its row still `running`.
pub struct LifecycleCoordinator {
    store: Arc<dyn LeaseStore>,
    runtime: Arc<dyn RuntimeClient>,
    in_flight: Arc<InFlightRegistry>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LifecycleCoordinator {
    /// Creates a coordinator over the given store and runtime.
    pub fn new(store: Arc<dyn LeaseStore>, runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            store,
            runtime,
            in_flight: Arc::new(InFlightRegistry::default()),
        }
    }

    /// Stops the sandbox's unit and deletes its lease row.
    ///
    /// If the row does not exist this is a no-op that returns
    /// [`TerminationOutcome::AlreadyGone`]. If the runtime rejects the stop, the row is moved to
    /// `error` and kept so it can be inspected. If the runtime cannot be reached, the row stays
    /// `running` and a later sweep retries.
    ///
    /// ## Arguments
    ///
    /// * `sandbox_id` - The sandbox to terminate
    /// * `policy` - What to do if a termination for this sandbox is already running
    pub async fn terminate(
        &self,
        sandbox_id: i64,
        policy: ContentionPolicy,
    ) -> PodleaseResult<TerminationOutcome> {
        let token = match self.in_flight.claim(sandbox_id) {
            Claim::Leader(token) => token,
            Claim::Follower(mut rx) => {
                if policy == ContentionPolicy::Reject {
                    tracing::debug!(sandbox_id, "termination already in progress");
                    return Err(PodleaseError::AlreadyTerminating(sandbox_id));
                }

                tracing::debug!(sandbox_id, "waiting for in-progress termination");
                let outcome = rx
                    .wait_for(Option::is_some)
                    .await
                    .map(|outcome| outcome.clone())
                    .map_err(|_| PodleaseError::TerminationInterrupted(sandbox_id))?;

                return match outcome {
                    Some(Ok(outcome)) => Ok(outcome),
                    Some(Err(failure)) => Err(failure.into()),
                    None => Err(PodleaseError::TerminationInterrupted(sandbox_id)),
                };
            }
        };

        let store = Arc::clone(&self.store);
        let runtime = Arc::clone(&self.runtime);

        let handle = tokio::spawn(async move {
            let result = run_termination(store.as_ref(), runtime.as_ref(), sandbox_id).await;
            token.complete(share(&result));
            result
        });

        handle.await?
    }

    /// Whether a termination for `sandbox_id` is running right now.
    pub fn is_terminating(&self, sandbox_id: i64) -> bool {
        self.in_flight.contains(sandbox_id)
    }

    /// Number of terminations running right now.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<TerminationFailure> for PodleaseError {
    fn from(failure: TerminationFailure) -> Self {
        match failure {
            TerminationFailure::RuntimeUnavailable(reason) => {
                PodleaseError::RuntimeUnavailable(reason)
            }
            TerminationFailure::RuntimeApi(reason) => PodleaseError::RuntimeApi(reason),
            TerminationFailure::Store(reason) => PodleaseError::StoreUnavailableReported(reason),
            TerminationFailure::Other(reason) => PodleaseError::custom(anyhow::anyhow!(reason)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The termination sequence. Must only run while holding the sandbox's exclusion token.
async fn run_termination(
    store: &dyn LeaseStore,
    runtime: &dyn RuntimeClient,
    sandbox_id: i64,
) -> PodleaseResult<TerminationOutcome> {
    let Some(sandbox) = store.get_by_id(sandbox_id).await? else {
        tracing::debug!(sandbox_id, "no lease record, nothing to terminate");
        return Ok(TerminationOutcome::AlreadyGone { sandbox_id });
    };

    let unit_found = match runtime.stop(&sandbox.runtime_handle).await {
        Ok(found) => found,
        Err(PodleaseError::RuntimeUnavailable(reason)) => {
            tracing::warn!(
                sandbox_id,
                runtime_handle = %sandbox.runtime_handle,
                "runtime unreachable, leaving sandbox for a later sweep: {}",
                reason
            );
            return Err(PodleaseError::RuntimeUnavailable(reason));
        }
        Err(e) => {
            tracing::error!(
                sandbox_id,
                runtime_handle = %sandbox.runtime_handle,
                error = %e,
                "failed to stop unit, marking sandbox as error"
            );

            if let Err(store_err) = store.update_status(sandbox_id, SandboxStatus::Error).await {
                tracing::error!(sandbox_id, error = %store_err, "failed to record error status");
            }

            return Err(e);
        }
    };

    if !store.delete(sandbox_id).await? {
        tracing::debug!(sandbox_id, "lease record already deleted");
    }

    tracing::info!(
        sandbox_id,
        owner_id = %sandbox.owner_id,
        runtime_handle = %sandbox.runtime_handle,
        unit_found,
        "reclaimed sandbox"
    );

    Ok(TerminationOutcome::Reclaimed {
        sandbox_id,
        unit_found,
    })
}

fn share(result: &PodleaseResult<TerminationOutcome>) -> SharedOutcome {
    match result {
        Ok(outcome) => Ok(outcome.clone()),
        Err(PodleaseError::RuntimeUnavailable(reason)) => {
            Err(TerminationFailure::RuntimeUnavailable(reason.clone()))
        }
        Err(PodleaseError::RuntimeApi(reason)) => Err(TerminationFailure::RuntimeApi(reason.clone())),
        Err(e @ (PodleaseError::StoreUnavailable(_) | PodleaseError::StoreUnavailableReported(_))) => {
            Err(TerminationFailure::Store(e.to_string()))
        }
        Err(e) => Err(TerminationFailure::Other(e.to_string())),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
