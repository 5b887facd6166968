use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::broadcast,
    task::{AbortHandle, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    models::{Sandbox, SandboxStatus},
    store::LeaseStore,
    PodleaseError, PodleaseResult,
};

use super::{ContentionPolicy, LifecycleCoordinator, TerminationOutcome};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Shortest sleep of a timer that woke before its lease ended.
const MIN_TIMER_RECHECK: Duration = Duration::from_millis(10);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Enforces lease expiry.
///
/// Two triggers drive every expiry:
/// - a per-sandbox timer armed when the sandbox is created (or recovered at start-up)
/// - a periodic sweep over the lease store that catches anything the timers missed
///
/// Both go through the [`LifecycleCoordinator`], so they never double-stop a unit.
pub struct ExpirationScheduler {
    /// The coordinator every expiry goes through.
    coordinator: Arc<LifecycleCoordinator>,

    /// The lease store the sweep reads from.
    store: Arc<dyn LeaseStore>,

    /// The clock the sweep compares leases against.
    clock: Arc<dyn Clock>,

    /// Time between sweeps.
    sweep_interval: Duration,

    /// Pending per-sandbox timers.
    timers: Arc<Mutex<HashMap<i64, ArmedTimer>>>,

    /// Distinguishes a re-armed timer from the one it replaced.
    next_generation: AtomicU64,

    /// The running sweep loop, if started.
    sweep_task: Mutex<Option<JoinHandle<()>>>,

    /// The channel to send shutdown signals to the sweep loop.
    shutdown_tx: broadcast::Sender<()>,
}

/// A summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Number of expired `running` sandboxes the sweep found.
    pub examined: usize,

    /// Sandboxes whose unit was stopped and whose row was deleted.
    pub reclaimed: Vec<i64>,

    /// Sandboxes another trigger deleted between the scan and the termination.
    pub already_gone: Vec<i64>,

    /// Sandboxes another trigger was already terminating.
    pub in_flight: Vec<i64>,

    /// Sandboxes whose termination failed, with the reason.
    pub failed: Vec<(i64, String)>,
}

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    handle: AbortHandle,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExpirationScheduler {
    /// Creates a scheduler. Nothing runs until [`start`](Self::start) is called.
    pub fn new(
        coordinator: Arc<LifecycleCoordinator>,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            coordinator,
            store,
            clock,
            sweep_interval,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            sweep_task: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Re-arms a timer for every `running` sandbox in the store, then starts the sweep loop.
    ///
    /// Sandboxes that already expired while nothing was watching are terminated right away.
    pub async fn start(self: &Arc<Self>) -> PodleaseResult<()> {
        if self.lock_sweep_task().is_some() {
            warn!("expiration scheduler already started");
            return Ok(());
        }

        let running = self.store.list_by_status(SandboxStatus::Running).await?;
        for sandbox in &running {
            self.arm(sandbox);
        }
        info!(recovered = running.len(), "re-armed lease timers");

        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(Arc::clone(self).run_sweeps(shutdown_rx));

        let mut slot = self.lock_sweep_task();
        if slot.is_some() {
            // Lost a race with a concurrent start.
            task.abort();
        } else {
            *slot = Some(task);
        }

        Ok(())
    }

    /// Arms the expiry timer for `sandbox`, replacing any timer already armed for it.
    pub fn arm(&self, sandbox: &Sandbox) {
        self.arm_at(sandbox.id, sandbox.expires_at);
    }

    /// Arms an expiry timer for `sandbox_id` that fires at `expires_at`.
    ///
    /// The timer sleeps on the runtime's timer but only terminates once the scheduler's clock
    /// agrees the lease has ended, the same test the sweep applies. If it wakes early it sleeps
    /// again for the remainder.
    pub fn arm_at(&self, sandbox_id: i64, expires_at: DateTime<Utc>) {
        let delay = remaining(expires_at, self.clock.now());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let coordinator = Arc::clone(&self.coordinator);
        let clock = Arc::clone(&self.clock);
        let timers = Arc::clone(&self.timers);

        // Hold the map while spawning so the task cannot try to clear its entry before it exists.
        let mut armed = self.timers.lock().unwrap_or_else(|e| e.into_inner());

        let task = tokio::spawn(async move {
            let mut wait = delay;
            loop {
                time::sleep(wait).await;

                let now = clock.now();
                if expires_at < now {
                    break;
                }

                wait = remaining(expires_at, now).max(MIN_TIMER_RECHECK);
                debug!(sandbox_id, wait_ms = wait.as_millis() as u64, "lease timer woke early");
            }
            debug!(sandbox_id, "lease timer fired");

            match coordinator
                .terminate(sandbox_id, ContentionPolicy::Reject)
                .await
            {
                Ok(TerminationOutcome::Reclaimed { .. }) => {
                    info!(sandbox_id, "lease expired, sandbox reclaimed")
                }
                Ok(TerminationOutcome::AlreadyGone { .. }) => {
                    debug!(sandbox_id, "lease expired, sandbox already gone")
                }
                Err(PodleaseError::AlreadyTerminating(_)) => {
                    debug!(sandbox_id, "lease expired, termination already in progress")
                }
                Err(e) => warn!(sandbox_id, error = %e, "lease expired, termination failed"),
            }

            let mut timers = timers.lock().unwrap_or_else(|e| e.into_inner());
            if timers
                .get(&sandbox_id)
                .is_some_and(|timer| timer.generation == generation)
            {
                timers.remove(&sandbox_id);
            }
        });

        if let Some(previous) = armed.insert(
            sandbox_id,
            ArmedTimer {
                generation,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
        }

        debug!(sandbox_id, delay_ms = delay.as_millis() as u64, "armed lease timer");
    }

    /// Cancels the expiry timer for `sandbox_id`, if one is armed.
    pub fn disarm(&self, sandbox_id: i64) {
        if let Some(timer) = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sandbox_id)
        {
            timer.handle.abort();
            debug!(sandbox_id, "disarmed lease timer");
        }
    }

    /// Number of timers currently armed.
    pub fn armed_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs one sweep: terminates every `running` sandbox whose lease has ended.
    ///
    /// Terminations run concurrently, so one slow or failing sandbox does not hold back the
    /// others. Fails only if the store cannot be read, in which case nothing was attempted.
    pub async fn sweep_once(&self) -> PodleaseResult<SweepReport> {
        let now = self.clock.now();
        let expired = self.store.list_expired_running(now).await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..Default::default()
        };

        if expired.is_empty() {
            return Ok(report);
        }

        let results = futures::future::join_all(expired.iter().map(|sandbox| {
            self.coordinator
                .terminate(sandbox.id, ContentionPolicy::Reject)
        }))
        .await;

        for (sandbox, result) in expired.iter().zip(results) {
            match result {
                Ok(TerminationOutcome::Reclaimed { .. }) => {
                    self.disarm(sandbox.id);
                    report.reclaimed.push(sandbox.id);
                }
                Ok(TerminationOutcome::AlreadyGone { .. }) => {
                    self.disarm(sandbox.id);
                    report.already_gone.push(sandbox.id);
                }
                Err(PodleaseError::AlreadyTerminating(id)) => report.in_flight.push(id),
                Err(e) => {
                    warn!(sandbox_id = sandbox.id, error = %e, "sweep failed to reclaim sandbox");
                    report.failed.push((sandbox.id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Stops the sweep loop and cancels every armed timer.
    ///
    /// Terminations already running are left to finish on their own tasks.
    pub async fn shutdown(&self) -> PodleaseResult<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("no sweep loop to signal: {}", e);
        }

        let timers: Vec<_> = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, timer)| timer.handle)
            .collect();
        for handle in timers {
            handle.abort();
        }

        let task = self.lock_sweep_task().take();
        if let Some(task) = task {
            task.await?;
        }

        info!("expiration scheduler stopped");
        Ok(())
    }

    async fn run_sweeps(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.sweep_interval.as_millis() as u64,
            "sweep loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => match self.sweep_once().await {
                    Ok(report) if report.examined > 0 => info!(
                        examined = report.examined,
                        reclaimed = report.reclaimed.len(),
                        already_gone = report.already_gone.len(),
                        in_flight = report.in_flight.len(),
                        failed = report.failed.len(),
                        "sweep finished"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "lease store unavailable, skipping sweep"),
                },
            }
        }
    }

    fn lock_sweep_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweep_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SweepReport {
    /// Whether no expired sandbox the sweep found is still in flight or failed.
    pub fn is_clean(&self) -> bool {
        self.in_flight.is_empty() && self.failed.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Time left until `expires_at`, or zero if it has passed.
fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}
