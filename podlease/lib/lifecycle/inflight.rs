use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use super::coordinator::{TerminationFailure, TerminationOutcome};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The shared result of one termination sequence.
pub(crate) type SharedOutcome = Result<TerminationOutcome, TerminationFailure>;

/// Per-sandbox exclusion tokens.
///
/// A sandbox id has an entry only while a termination for it is running. The entry holds the
/// channel on which the running sequence publishes its outcome, so later callers can either
/// watch it or back off.
#[derive(Debug, Default)]
pub(crate) struct InFlightRegistry {
    slots: Mutex<HashMap<i64, watch::Receiver<Option<SharedOutcome>>>>,
}

/// The result of trying to take the exclusion token for a sandbox.
pub(crate) enum Claim {
    /// The caller holds the token and must run the termination.
    Leader(LeaderToken),

    /// Another termination holds the token. The receiver yields its outcome.
    Follower(watch::Receiver<Option<SharedOutcome>>),
}

/// Proof of holding the exclusion token for a sandbox.
///
/// Dropping the token releases it, whether or not an outcome was published.
pub(crate) struct LeaderToken {
    registry: Arc<InFlightRegistry>,
    sandbox_id: i64,
    tx: watch::Sender<Option<SharedOutcome>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InFlightRegistry {
    /// Takes the token for `sandbox_id`, or joins the termination that holds it.
    pub(crate) fn claim(self: &Arc<Self>, sandbox_id: i64) -> Claim {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(rx) = slots.get(&sandbox_id) {
            return Claim::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        slots.insert(sandbox_id, rx);

        Claim::Leader(LeaderToken {
            registry: Arc::clone(self),
            sandbox_id,
            tx,
        })
    }

    /// Whether a termination for `sandbox_id` is running.
    pub(crate) fn contains(&self, sandbox_id: i64) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&sandbox_id)
    }

    /// Number of terminations currently running.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release(&self, sandbox_id: i64) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sandbox_id);
    }
}

impl LeaderToken {
    /// Publishes the outcome to every follower and releases the token.
    pub(crate) fn complete(self, outcome: SharedOutcome) {
        // Followers may all have gone away; that is fine.
        let _ = self.tx.send(Some(outcome));
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for LeaderToken {
    fn drop(&mut self) {
        self.registry.release(self.sandbox_id);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
