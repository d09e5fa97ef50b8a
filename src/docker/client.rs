//! Docker/Podman client wrapper.
//!
//! Provides a simplified interface to the bollard Docker API with connection
//! fallback and the container queries the engine needs.

use crate::engine::{EngineError, Result};
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Paused,
    Restarting,
    Stopped,
    Dead,
}

/// Docker/Podman API client wrapper.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl ContainerClient {
    /// Connect to Docker or Podman and verify the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Backend`] if no runtime is reachable.
    pub async fn connect() -> Result<Self> {
        let client = Self {
            docker: Arc::new(Self::connect_docker()?),
        };
        client.ping().await?;
        Ok(client)
    }

    /// Tries local defaults (socket, named pipe or `DOCKER_HOST`), then the
    /// rootless and system Podman sockets.
    fn connect_docker() -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                sockets.push(format!("unix://{}/podman/podman.sock", runtime_dir));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(EngineError::Backend(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running."
                .to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Backend(format!("Failed to ping container runtime: {}", e)))?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Check if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Default entrypoint and command of a local image.
    pub async fn image_command(&self, image: &str) -> Result<(Vec<String>, Vec<String>)> {
        let inspect = self.docker.inspect_image(image).await?;
        let config = inspect.config.unwrap_or_default();
        Ok((config.entrypoint.unwrap_or_default(), config.cmd.unwrap_or_default()))
    }

    /// State of a container; `None` if no such container exists.
    pub async fn container_state(&self, name_or_id: &str) -> Result<Option<ContainerState>> {
        let inspect = match self
            .docker
            .inspect_container(
                name_or_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(state) = inspect.state else {
            return Ok(Some(ContainerState::Stopped));
        };

        Ok(Some(if state.running.unwrap_or(false) {
            ContainerState::Running
        } else if state.paused.unwrap_or(false) {
            ContainerState::Paused
        } else if state.restarting.unwrap_or(false) {
            ContainerState::Restarting
        } else if state.dead.unwrap_or(false) {
            ContainerState::Dead
        } else {
            ContainerState::Stopped
        }))
    }

    /// Whether a container exists and is running.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.container_state(name).await? == Some(ContainerState::Running))
    }

    /// Host port published for `container_port/tcp` of a running container.
    pub async fn published_port(&self, name: &str, container_port: u16) -> Result<Option<u16>> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let key = format!("{}/tcp", container_port);
        Ok(inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key).flatten())
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|b| b.host_port.and_then(|p| p.parse().ok()))
            }))
    }

    /// Start an existing container.
    pub async fn start_container(&self, name: &str) -> Result<()> {
        debug!("Starting container: {}", name);
        self.docker
            .start_container(name, None::<bollard::container::StartContainerOptions<String>>)
            .await?;
        info!("Started container: {}", name);
        Ok(())
    }

    /// Stop a container, waiting at most `timeout` seconds before killing it.
    /// A missing container counts as stopped.
    pub async fn stop_container(&self, name: &str, timeout: i64) -> Result<()> {
        debug!("Stopping container: {}", name);
        match self
            .docker
            .stop_container(name, Some(bollard::container::StopContainerOptions { t: timeout }))
            .await
        {
            Ok(()) => {
                info!("Stopped container: {}", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a container together with its anonymous volumes. A missing
    /// container is not an error.
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        debug!("Removing container: {}", name);
        match self
            .docker
            .remove_container(
                name,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                debug!("Removed container: {}", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for a container to exit and return its exit code.
    pub async fn wait_container(&self, name: &str) -> Result<i64> {
        use futures::stream::StreamExt;

        let mut stream = self
            .docker
            .wait_container(name, None::<bollard::container::WaitContainerOptions<String>>);
        let mut exit_code = 0;
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => exit_code = response.status_code,
                // non-zero exits surface as an error carrying the code
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Container {} exited with {}", name, exit_code);
        Ok(exit_code)
    }

    /// Combined stdout and stderr of a container.
    pub async fn logs(&self, name: &str) -> Result<String> {
        use futures::stream::StreamExt;

        let mut stream = self.docker.logs(
            name,
            Some(bollard::container::LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            output.push_str(&result?.to_string());
        }
        Ok(output)
    }
}
