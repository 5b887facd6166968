//! Sandbox lifecycle: serialized termination and lease expiry.
//!
//! The [`LifecycleCoordinator`] owns the stop-then-delete sequence and makes sure it runs at
//! most once at a time per sandbox. The [`ExpirationScheduler`] decides *when* to call it.

mod coordinator;
mod inflight;
mod scheduler;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use coordinator::*;
pub use scheduler::*;
