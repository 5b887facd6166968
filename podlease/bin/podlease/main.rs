mod handlers;

use clap::{CommandFactory, Parser};
use podlease::{
    cli::{PodleaseArgs, PodleaseSubcommand},
    config::PodleaseConfig,
    utils::{self, LOG_SUBDIR},
    PodleaseResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PodleaseResult<()> {
    let args = PodleaseArgs::parse();

    let Some(subcommand) = args.subcommand else {
        PodleaseArgs::command().print_help()?;
        return Ok(());
    };

    // Read before tracing so `.env` can set `RUST_LOG` and `PODLEASE_HOME`.
    let dotenv = utils::load_dotenv();

    // Only the long-running daemon keeps a log file.
    let log_dir = match &subcommand {
        PodleaseSubcommand::Serve { log_dir } => Some(
            log_dir
                .clone()
                .unwrap_or_else(|| utils::podlease_home().join(LOG_SUBDIR)),
        ),
        _ => None,
    };
    let _guard = podlease::init_tracing(args.verbose, log_dir.as_deref())?;

    match dotenv {
        Ok(Some(path)) => tracing::debug!("loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => tracing::warn!("failed to read .env file: {}", e),
    }

    let config = PodleaseConfig::load()?;

    match subcommand {
        PodleaseSubcommand::Serve { .. } => {
            tracing::trace!("serving: config={config:?}");
            handlers::serve_subcommand(&config).await?;
        }
        PodleaseSubcommand::Create {
            owner,
            minutes,
            image,
            command,
        } => {
            tracing::trace!("creating sandbox: owner={owner}, minutes={minutes}, image={image:?}, command={command:?}");
            handlers::create_subcommand(&config, &owner, minutes, image, command).await?;
        }
        PodleaseSubcommand::Status { id, owner } => {
            handlers::status_subcommand(&config, &owner, id).await?;
        }
        PodleaseSubcommand::Terminate { id, owner } => {
            handlers::terminate_subcommand(&config, &owner, id).await?;
        }
        PodleaseSubcommand::List { owner } => {
            handlers::list_subcommand(&config, &owner).await?;
        }
        PodleaseSubcommand::Sweep => {
            handlers::sweep_subcommand(&config).await?;
        }
    }

    Ok(())
}
