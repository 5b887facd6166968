#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use podlease::{
    clock::{Clock, ManualClock, SystemClock},
    config::PodleaseConfig,
    models::{NewSandbox, Sandbox, SandboxStatus},
    runtime::{RuntimeClient, UnitStatus},
    service::PodService,
    store::{LeaseStore, SqliteLeaseStore},
    PodleaseError, PodleaseResult,
};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A failure the fake runtime can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The runtime answers with an error.
    Api,

    /// The runtime cannot be reached.
    Unavailable,
}

/// An in-memory runtime that records every stop.
#[derive(Default)]
pub struct FakeRuntime {
    units: Mutex<HashMap<String, String>>,
    next_handle: AtomicU64,
    stop_calls: AtomicUsize,
    effective_stops: AtomicUsize,
    stop_delay: Mutex<Duration>,
    stop_failures: Mutex<HashMap<String, Failure>>,
    all_stops_fail: Mutex<Option<Failure>>,
}

/// A lease store whose scans or writes can be made to fail on demand.
pub struct FlakyStore {
    inner: SqliteLeaseStore,
    fail_scans: AtomicBool,
    fail_writes: AtomicBool,
    stale_scans: AtomicBool,
}

/// A service over a fake runtime and a throwaway database.
pub struct Harness {
    pub service: PodService,
    pub runtime: Arc<FakeRuntime>,
    pub store: Arc<FlakyStore>,
    pub manual_clock: Option<Arc<ManualClock>>,
    _dir: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeRuntime {
    /// Makes every stop wait for `delay` before doing anything.
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    /// Makes stops of `handle` fail.
    pub fn fail_stops_for(&self, handle: &str, failure: Failure) {
        self.stop_failures
            .lock()
            .unwrap()
            .insert(handle.to_string(), failure);
    }

    /// Makes every stop fail, or clears that with `None`.
    pub fn fail_all_stops(&self, failure: Option<Failure>) {
        *self.all_stops_fail.lock().unwrap() = failure;
    }

    /// Removes the unit behind the runtime's back.
    pub fn vanish(&self, handle: &str) {
        self.units.lock().unwrap().remove(handle);
    }

    /// Marks the unit as exited without removing it.
    pub fn exit(&self, handle: &str) {
        if let Some(state) = self.units.lock().unwrap().get_mut(handle) {
            *state = "exited".to_string();
        }
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Stops that actually took a running unit down.
    pub fn effective_stops(&self) -> usize {
        self.effective_stops.load(Ordering::SeqCst)
    }

    pub fn exists(&self, handle: &str) -> bool {
        self.units.lock().unwrap().contains_key(handle)
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().unwrap().len()
    }
}

impl FlakyStore {
    pub fn set_fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes each expiry scan delete the rows it returns, as if another trigger reclaimed them
    /// right after the scan.
    pub fn set_stale_scans(&self, stale: bool) {
        self.stale_scans.store(stale, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> PodleaseResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(PodleaseError::StoreUnavailable(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

impl Harness {
    /// A harness on the system clock, for tests that rely on real timers.
    pub async fn new() -> Self {
        Self::build(Arc::new(SystemClock), None, Duration::from_secs(3600)).await
    }

    /// A harness on a manual clock, for tests that drive the sweep.
    pub async fn with_manual_clock() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Self::build(clock.clone(), Some(clock), Duration::from_secs(3600)).await
    }

    /// A harness on a manual clock whose sweep loop runs every `sweep_interval`.
    pub async fn with_manual_clock_and_interval(sweep_interval: Duration) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Self::build(clock.clone(), Some(clock), sweep_interval).await
    }

    async fn build(
        clock: Arc<dyn Clock>,
        manual_clock: Option<Arc<ManualClock>>,
        sweep_interval: Duration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let config = PodleaseConfig::builder()
            .home_dir(dir.path())
            .sweep_interval_ms(sweep_interval.as_millis() as u64)
            .build();

        let inner = SqliteLeaseStore::open(config.database_path(), clock.clone())
            .await
            .unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            fail_scans: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            stale_scans: AtomicBool::new(false),
        });
        let runtime = Arc::new(FakeRuntime::default());

        let service = PodService::new(store.clone(), runtime.clone(), clock, &config);

        Self {
            service,
            runtime,
            store,
            manual_clock,
            _dir: dir,
        }
    }

    /// Moves the manual clock forward.
    pub fn advance(&self, delta: TimeDelta) {
        self.manual_clock
            .as_ref()
            .expect("harness has no manual clock")
            .advance(delta);
    }

    /// Starts a unit and writes its lease row without arming a timer, as if a previous process
    /// had created it.
    pub async fn insert_untracked(&self, owner_id: &str, lease: Duration) -> Sandbox {
        let handle = self
            .runtime
            .create(owner_id, "python:3.8-slim", &[])
            .await
            .unwrap();
        self.store
            .insert(NewSandbox::new(handle, owner_id, lease))
            .await
            .unwrap()
    }

    /// Reads a row regardless of owner.
    pub async fn row(&self, id: i64) -> Option<Sandbox> {
        self.store.inner.get_by_id(id).await.unwrap()
    }

    /// Waits until the row for `id` is gone, or panics after `timeout`.
    pub async fn wait_for_deletion(&self, id: i64, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.row(id).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("sandbox {id} was not reclaimed within {timeout:?}"));
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn create(
        &self,
        owner_id: &str,
        image: &str,
        _command: &[String],
    ) -> PodleaseResult<String> {
        if image.starts_with("missing") {
            return Err(PodleaseError::ImageError(format!("no such image: {image}")));
        }

        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = format!("fake-{owner_id}-{n}");
        self.units
            .lock()
            .unwrap()
            .insert(handle.clone(), "running".to_string());

        Ok(handle)
    }

    async fn stop(&self, handle: &str) -> PodleaseResult<bool> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .stop_failures
            .lock()
            .unwrap()
            .get(handle)
            .copied()
            .or(*self.all_stops_fail.lock().unwrap());

        match failure {
            Some(Failure::Api) => {
                return Err(PodleaseError::RuntimeApi(format!("cannot stop {handle}")))
            }
            Some(Failure::Unavailable) => {
                return Err(PodleaseError::RuntimeUnavailable("connection refused".into()))
            }
            None => {}
        }

        match self.units.lock().unwrap().remove(handle) {
            Some(state) if state == "running" => {
                self.effective_stops.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn status(&self, handle: &str) -> PodleaseResult<UnitStatus> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .get(handle)
            .map(|state| UnitStatus::State(state.clone()))
            .unwrap_or(UnitStatus::NotFound))
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn insert(&self, sandbox: NewSandbox) -> PodleaseResult<Sandbox> {
        Self::check(&self.fail_writes)?;
        self.inner.insert(sandbox).await
    }

    async fn get(&self, id: i64, owner_id: &str) -> PodleaseResult<Option<Sandbox>> {
        self.inner.get(id, owner_id).await
    }

    async fn get_by_id(&self, id: i64) -> PodleaseResult<Option<Sandbox>> {
        self.inner.get_by_id(id).await
    }

    async fn update_status(&self, id: i64, status: SandboxStatus) -> PodleaseResult<bool> {
        Self::check(&self.fail_writes)?;
        self.inner.update_status(id, status).await
    }

    async fn delete(&self, id: i64) -> PodleaseResult<bool> {
        Self::check(&self.fail_writes)?;
        self.inner.delete(id).await
    }

    async fn list_expired_running(&self, now: DateTime<Utc>) -> PodleaseResult<Vec<Sandbox>> {
        Self::check(&self.fail_scans)?;
        let expired = self.inner.list_expired_running(now).await?;

        if self.stale_scans.load(Ordering::SeqCst) {
            for sandbox in &expired {
                self.inner.delete(sandbox.id).await?;
            }
        }

        Ok(expired)
    }

    async fn list_by_status(&self, status: SandboxStatus) -> PodleaseResult<Vec<Sandbox>> {
        Self::check(&self.fail_scans)?;
        self.inner.list_by_status(status).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> PodleaseResult<Vec<Sandbox>> {
        Self::check(&self.fail_scans)?;
        self.inner.list_by_owner(owner_id).await
    }
}
