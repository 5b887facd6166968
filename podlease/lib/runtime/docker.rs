//! Docker Engine implementation of the runtime client.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::ContainerCreateResponse,
    Docker,
};
use futures::TryStreamExt;

use crate::{PodleaseError, PodleaseResult};

use super::{unit_name, RuntimeClient, UnitStatus, OWNER_LABEL};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`RuntimeClient`] that runs sandbox units as Docker containers.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// The Docker Engine connection.
    docker: Docker,

    /// Seconds a container gets to exit after SIGTERM before it is killed.
    stop_timeout_secs: i64,
}

/// How a failed Docker call should be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DockerFailure {
    /// The container (or image) does not exist.
    Absent,

    /// The request had nothing to do, e.g. stopping an already stopped container.
    NotModified,

    /// The engine could not be reached or did not answer in time.
    Unreachable(String),

    /// The engine answered with an error.
    Rejected(String),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Connects to the local Docker Engine using the platform defaults (`DOCKER_HOST` or the
    /// default socket).
    pub fn connect(stop_timeout_secs: i64) -> PodleaseResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| PodleaseError::RuntimeUnavailable(e.to_string()))?;

        Ok(Self::new(docker, stop_timeout_secs))
    }

    /// Wraps an existing Docker connection.
    pub fn new(docker: Docker, stop_timeout_secs: i64) -> Self {
        Self {
            docker,
            stop_timeout_secs,
        }
    }

    async fn create_container(
        &self,
        name: &str,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await
    }

    /// Pulls `image` from its registry, waiting for the pull to finish.
    async fn pull(&self, image: &str) -> PodleaseResult<()> {
        let (from_image, tag) = split_reference(image);
        tracing::info!(image, "image not present locally, pulling");

        let mut progress = Box::pin(self.docker.create_image(
            Some(CreateImageOptions {
                from_image: from_image.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        ));

        while let Some(info) = progress.try_next().await.map_err(|e| pull_error(image, &e))? {
            if let Some(error) = info.error {
                return Err(PodleaseError::ImageError(format!(
                    "cannot pull {image}: {error}"
                )));
            }

            if let Some(status) = info.status {
                tracing::debug!(image, "pull: {}", status);
            }
        }

        tracing::info!(image, "pulled image");
        Ok(())
    }

    /// Force-removes a container that was created but never started.
    async fn discard(&self, handle: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(runtime_handle = %handle, error = %e, "failed to discard unstarted container");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn create(
        &self,
        owner_id: &str,
        image: &str,
        command: &[String],
    ) -> PodleaseResult<String> {
        let name = unit_name(owner_id);
        let labels = HashMap::from([(OWNER_LABEL.to_string(), owner_id.to_string())]);

        let config = Config {
            image: Some(image.to_string()),
            cmd: (!command.is_empty()).then(|| command.to_vec()),
            labels: Some(labels),
            ..Default::default()
        };

        let response = match self.create_container(&name, config.clone()).await {
            Ok(response) => response,
            Err(e) if classify(&e) == DockerFailure::Absent => {
                self.pull(image).await?;
                self.create_container(&name, config)
                    .await
                    .map_err(|e| create_error(image, &e))?
            }
            Err(e) => return Err(create_error(image, &e)),
        };

        for warning in &response.warnings {
            tracing::warn!(runtime_handle = %response.id, "docker: {}", warning);
        }

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&response.id).await;
            return Err(create_error(image, &e));
        }

        tracing::info!(
            owner_id = %owner_id,
            runtime_handle = %response.id,
            unit_name = %name,
            "started container"
        );

        Ok(response.id)
    }

    async fn stop(&self, handle: &str) -> PodleaseResult<bool> {
        let mut was_running = true;

        if let Err(e) = self
            .docker
            .stop_container(
                handle,
                Some(StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
        {
            match classify(&e) {
                DockerFailure::Absent => {
                    tracing::debug!(runtime_handle = %handle, "container already removed");
                    return Ok(false);
                }
                DockerFailure::NotModified => {
                    tracing::debug!(runtime_handle = %handle, "container already stopped");
                    was_running = false;
                }
                DockerFailure::Unreachable(reason) => {
                    return Err(PodleaseError::RuntimeUnavailable(reason))
                }
                DockerFailure::Rejected(reason) => return Err(PodleaseError::RuntimeApi(reason)),
            }
        }

        if let Err(e) = self
            .docker
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            match classify(&e) {
                // Removed by someone else between our stop and remove.
                DockerFailure::Absent | DockerFailure::NotModified => {}
                DockerFailure::Unreachable(reason) => {
                    return Err(PodleaseError::RuntimeUnavailable(reason))
                }
                DockerFailure::Rejected(reason) => return Err(PodleaseError::RuntimeApi(reason)),
            }
        }

        Ok(was_running)
    }

    async fn status(&self, handle: &str) -> PodleaseResult<UnitStatus> {
        match self
            .docker
            .inspect_container(handle, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => {
                let state = response
                    .state
                    .and_then(|state| state.status)
                    .map(|status| status.to_string())
                    .filter(|status| !status.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());

                Ok(UnitStatus::State(state))
            }
            Err(e) => match classify(&e) {
                DockerFailure::Absent => Ok(UnitStatus::NotFound),
                DockerFailure::Unreachable(reason) => Err(PodleaseError::RuntimeUnavailable(reason)),
                DockerFailure::NotModified | DockerFailure::Rejected(_) => {
                    Err(PodleaseError::RuntimeApi(e.to_string()))
                }
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Sorts a Docker error into the small set of outcomes the lifecycle cares about.
pub(crate) fn classify(error: &DockerError) -> DockerFailure {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => DockerFailure::Absent,
        DockerError::DockerResponseServerError {
            status_code: 304, ..
        } => DockerFailure::NotModified,
        DockerError::DockerResponseServerError { .. } => {
            DockerFailure::Rejected(error.to_string())
        }
        DockerError::IOError { .. }
        | DockerError::RequestTimeoutError
        | DockerError::SocketNotFoundError(_) => DockerFailure::Unreachable(error.to_string()),
        _ => DockerFailure::Rejected(error.to_string()),
    }
}

/// Splits an image reference into the repository and tag a pull asks for.
///
/// A reference without a tag pulls `latest`. A digest reference is passed through whole with
/// no tag.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    match image.rsplit_once(':') {
        // A colon before the last slash belongs to a registry port, not a tag.
        Some((repository, tag)) if !tag.contains('/') => (repository, tag),
        _ => (image, "latest"),
    }
}

fn pull_error(image: &str, error: &DockerError) -> PodleaseError {
    match classify(error) {
        DockerFailure::Unreachable(reason) => PodleaseError::RuntimeUnavailable(reason),
        DockerFailure::Absent => PodleaseError::ImageError(format!("no such image: {image}")),
        DockerFailure::NotModified | DockerFailure::Rejected(_) => {
            PodleaseError::ImageError(format!("cannot pull {image}: {error}"))
        }
    }
}

fn create_error(image: &str, error: &DockerError) -> PodleaseError {
    match classify(error) {
        DockerFailure::Unreachable(reason) => PodleaseError::RuntimeUnavailable(reason),
        DockerFailure::Absent => PodleaseError::ImageError(format!("no such image: {image}")),
        DockerFailure::NotModified | DockerFailure::Rejected(_) => {
            PodleaseError::ImageError(format!("{image}: {error}"))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
