//! The owner-facing sandbox service.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, Serializer};

use crate::{
    clock::{Clock, SystemClock},
    config::PodleaseConfig,
    lifecycle::{ContentionPolicy, ExpirationScheduler, LifecycleCoordinator, TerminationOutcome},
    models::{NewSandbox, Sandbox, SandboxStatus},
    runtime::{DockerRuntime, RuntimeClient, UnitStatus},
    store::{LeaseStore, SqliteLeaseStore},
    PodleaseError, PodleaseResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Creates, inspects and terminates leased sandboxes on behalf of their owners.
pub struct PodService {
    store: Arc<dyn LeaseStore>,
    runtime: Arc<dyn RuntimeClient>,
    coordinator: Arc<LifecycleCoordinator>,
    scheduler: Arc<ExpirationScheduler>,
    default_image: String,
    default_command: Vec<String>,
}

/// The state of one sandbox as seen by the store and the runtime together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxStatusReport {
    /// The lease record, after reconciliation.
    pub sandbox: Sandbox,

    /// What the runtime reports for the unit.
    #[serde(serialize_with = "serialize_unit_status")]
    pub runtime_status: UnitStatus,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodService {
    /// Wires a service over the given store, runtime and clock.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        runtime: Arc<dyn RuntimeClient>,
        clock: Arc<dyn Clock>,
        config: &PodleaseConfig,
    ) -> Self {
        let coordinator = Arc::new(LifecycleCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&runtime),
        ));
        let scheduler = Arc::new(ExpirationScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&store),
            clock,
            config.sweep_interval(),
        ));

        Self {
            store,
            runtime,
            coordinator,
            scheduler,
            default_image: config.get_default_image().clone(),
            default_command: config.default_argv(),
        }
    }

    /// Opens the SQLite lease store and connects to the local Docker Engine.
    pub async fn open(config: &PodleaseConfig) -> PodleaseResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = SqliteLeaseStore::open(config.database_path(), Arc::clone(&clock)).await?;
        let runtime = DockerRuntime::connect(*config.get_stop_timeout_secs())?;

        Ok(Self::new(Arc::new(store), Arc::new(runtime), clock, config))
    }

    /// The expiration scheduler. Call [`ExpirationScheduler::start`] to enforce leases.
    pub fn scheduler(&self) -> &Arc<ExpirationScheduler> {
        &self.scheduler
    }

    /// The lifecycle coordinator every termination goes through.
    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    /// Creates a sandbox from the default image and command with a lease of
    /// `duration_minutes`.
    pub async fn create_sandbox(
        &self,
        owner_id: &str,
        duration_minutes: u32,
    ) -> PodleaseResult<Sandbox> {
        let lease = Duration::from_secs(u64::from(duration_minutes) * 60);
        self.create_sandbox_with(owner_id, lease, &self.default_image, &self.default_command)
            .await
    }

    /// Creates a sandbox from `image` running `command` with the given lease.
    ///
    /// The unit is started first and the lease row written second. If the row cannot be
    /// written, the unit is stopped again so it does not run untracked.
    pub async fn create_sandbox_with(
        &self,
        owner_id: &str,
        lease: Duration,
        image: &str,
        command: &[String],
    ) -> PodleaseResult<Sandbox> {
        if owner_id.trim().is_empty() {
            return Err(PodleaseError::InvalidArgument(
                "owner id must not be empty".to_string(),
            ));
        }

        if image.trim().is_empty() {
            return Err(PodleaseError::InvalidArgument(
                "image must not be empty".to_string(),
            ));
        }

        let handle = self.runtime.create(owner_id, image, command).await?;

        let sandbox = match self
            .store
            .insert(NewSandbox::new(handle.clone(), owner_id, lease))
            .await
        {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::error!(
                    owner_id,
                    runtime_handle = %handle,
                    error = %e,
                    "failed to record lease, stopping unit"
                );

                if let Err(stop_err) = self.runtime.stop(&handle).await {
                    tracing::error!(
                        runtime_handle = %handle,
                        error = %stop_err,
                        "failed to stop untracked unit"
                    );
                }

                return Err(e);
            }
        };

        self.scheduler.arm(&sandbox);

        tracing::info!(
            sandbox_id = sandbox.id,
            owner_id,
            runtime_handle = %sandbox.runtime_handle,
            expires_at = %sandbox.expires_at,
            "created sandbox"
        );

        Ok(sandbox)
    }

    /// Terminates a sandbox owned by `owner_id`.
    ///
    /// Waits for a termination that is already running rather than failing, so the caller
    /// always learns how it ended.
    pub async fn terminate_sandbox(
        &self,
        owner_id: &str,
        sandbox_id: i64,
    ) -> PodleaseResult<TerminationOutcome> {
        if self.store.get(sandbox_id, owner_id).await?.is_none() {
            return Err(PodleaseError::NotFound(sandbox_id));
        }

        let outcome = self
            .coordinator
            .terminate(sandbox_id, ContentionPolicy::Wait)
            .await?;

        self.scheduler.disarm(sandbox_id);

        Ok(outcome)
    }

    /// Reports a sandbox owned by `owner_id`, reconciling the lease record with the runtime.
    ///
    /// A `running` record whose unit no longer exists is moved to `error`, since no termination
    /// accounted for it. A unit that exists but has exited keeps its `running` record, so the
    /// timer or the sweep still stops and removes it when the lease ends.
    pub async fn get_sandbox_status(
        &self,
        owner_id: &str,
        sandbox_id: i64,
    ) -> PodleaseResult<SandboxStatusReport> {
        let mut sandbox = self
            .store
            .get(sandbox_id, owner_id)
            .await?
            .ok_or(PodleaseError::NotFound(sandbox_id))?;

        let runtime_status = self.runtime.status(&sandbox.runtime_handle).await?;

        if sandbox.status == SandboxStatus::Running
            && runtime_status == UnitStatus::NotFound
            && !self.coordinator.is_terminating(sandbox_id)
        {
            tracing::warn!(
                sandbox_id,
                runtime_handle = %sandbox.runtime_handle,
                runtime_status = %runtime_status,
                "unit is gone but lease is running, marking sandbox as error"
            );

            if self
                .store
                .update_status(sandbox_id, SandboxStatus::Error)
                .await?
            {
                sandbox.status = SandboxStatus::Error;
            }
        } else if sandbox.status == SandboxStatus::Running && !runtime_status.is_live() {
            tracing::debug!(
                sandbox_id,
                runtime_status = %runtime_status,
                "unit has exited, leaving it for lease expiry"
            );
        }

        Ok(SandboxStatusReport {
            sandbox,
            runtime_status,
        })
    }

    /// Lists every sandbox owned by `owner_id`.
    pub async fn list_sandboxes(&self, owner_id: &str) -> PodleaseResult<Vec<Sandbox>> {
        self.store.list_by_owner(owner_id).await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn serialize_unit_status<S>(status: &UnitStatus, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(status)
}
