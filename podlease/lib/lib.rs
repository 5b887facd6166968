//! `podlease` hands out short-lived sandbox containers and reclaims them when their lease runs
//! out.
//!
//! # Overview
//!
//! Every sandbox is a runtime unit (a Docker container) paired with a lease row in a local
//! SQLite database. The row is the source of truth: a sandbox is supposed to be running exactly
//! as long as its row says `running` and its lease has not ended.
//!
//! Leases are enforced twice over:
//! - a timer armed per sandbox fires at its expiry
//! - a periodic sweep terminates anything the timers missed, including sandboxes left behind by
//!   a previous process
//!
//! Both triggers, and manual termination, go through one [`lifecycle::LifecycleCoordinator`]
//! that runs the stop-then-delete sequence at most once at a time per sandbox.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use podlease::{config::PodleaseConfig, service::PodService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PodleaseConfig::load()?;
//!     let service = PodService::open(&config).await?;
//!     service.scheduler().start().await?;
//!
//!     let sandbox = service.create_sandbox("alice", 5).await?;
//!     let report = service.get_sandbox_status("alice", sandbox.id).await?;
//!     println!("{} is {}", report.sandbox.id, report.sandbox.status);
//!
//!     service.terminate_sandbox("alice", sandbox.id).await?;
//!     service.scheduler().shutdown().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`clock`] - Wall clock abstraction
//! - [`config`] - Configuration loading and validation
//! - [`lifecycle`] - Termination coordination and lease expiry
//! - [`models`] - Lease records
//! - [`runtime`] - Runtime client and its Docker implementation
//! - [`service`] - The owner-facing sandbox service
//! - [`store`] - The lease store and its SQLite implementation
//! - [`utils`] - Paths and environment variables

#![warn(missing_docs)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod models;
pub mod runtime;
pub mod service;
pub mod store;
pub mod utils;

pub use error::*;
pub use log::*;
