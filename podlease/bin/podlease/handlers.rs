use std::time::Duration;

use podlease::{
    config::{split_command, PodleaseConfig},
    service::PodService,
    PodleaseResult,
};
use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn serve_subcommand(config: &PodleaseConfig) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;
    service.scheduler().start().await?;

    tracing::info!(
        database = %config.database_path().display(),
        sweep_interval_ms = config.get_sweep_interval_ms(),
        "podlease is enforcing leases"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }

    tracing::info!("shutting down");
    service.scheduler().shutdown().await
}

pub async fn create_subcommand(
    config: &PodleaseConfig,
    owner: &str,
    minutes: u32,
    image: Option<String>,
    command: Option<String>,
) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;

    let image = image.unwrap_or_else(|| config.get_default_image().clone());
    let command = command
        .map(|command| split_command(&command))
        .unwrap_or_else(|| config.default_argv());
    let lease = Duration::from_secs(u64::from(minutes) * 60);

    let sandbox = service
        .create_sandbox_with(owner, lease, &image, &command)
        .await?;

    print_json(&sandbox)
}

pub async fn status_subcommand(config: &PodleaseConfig, owner: &str, id: i64) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;
    print_json(&service.get_sandbox_status(owner, id).await?)
}

pub async fn terminate_subcommand(
    config: &PodleaseConfig,
    owner: &str,
    id: i64,
) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;
    print_json(&service.terminate_sandbox(owner, id).await?)
}

pub async fn list_subcommand(config: &PodleaseConfig, owner: &str) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;
    print_json(&service.list_sandboxes(owner).await?)
}

pub async fn sweep_subcommand(config: &PodleaseConfig) -> PodleaseResult<()> {
    let service = PodService::open(config).await?;
    print_json(&service.scheduler().sweep_once().await?)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn print_json(value: &impl Serialize) -> PodleaseResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
