use std::path::PathBuf;

use clap::Parser;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Podlease CLI - leased, self-reclaiming sandbox containers
#[derive(Debug, Parser)]
#[command(name = "podlease", author, about, version, styles=styles())]
pub struct PodleaseArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<PodleaseSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands for managing sandboxes
#[derive(Debug, Parser)]
pub enum PodleaseSubcommand {
    /// Run the expiration scheduler until interrupted
    #[command(name = "serve")]
    Serve {
        /// Directory for rotated log files, defaults to `log` under the podlease home
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Create a sandbox with a lease
    #[command(name = "create")]
    Create {
        /// The owner of the sandbox
        #[arg(short, long)]
        owner: String,

        /// Lease length in minutes
        #[arg(short, long)]
        minutes: u32,

        /// Image to run instead of the configured default
        #[arg(short, long)]
        image: Option<String>,

        /// Command to run instead of the configured default
        #[arg(short, long)]
        command: Option<String>,
    },

    /// Show a sandbox and the state of its unit
    #[command(name = "status")]
    Status {
        /// The sandbox id
        id: i64,

        /// The owner of the sandbox
        #[arg(short, long)]
        owner: String,
    },

    /// Stop a sandbox and release its lease
    #[command(name = "terminate")]
    Terminate {
        /// The sandbox id
        id: i64,

        /// The owner of the sandbox
        #[arg(short, long)]
        owner: String,
    },

    /// List the sandboxes of an owner
    #[command(name = "list")]
    List {
        /// The owner of the sandboxes
        #[arg(short, long)]
        owner: String,
    },

    /// Reclaim every expired sandbox once and exit
    #[command(name = "sweep")]
    Sweep,
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
