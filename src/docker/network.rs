//! Project network management.
//!
//! Every project gets one bridge network. Containers join their own project's
//! network at creation and the networks of linked projects right after, always
//! under their service name as alias.

use super::client::ContainerClient;
use crate::engine::Result;
use crate::env;
use bollard::models::EndpointSettings;
use std::collections::HashMap;
use tracing::{debug, info};

/// Network manager for project networks.
pub struct NetworkManager<'a> {
    client: &'a ContainerClient,
}

impl<'a> NetworkManager<'a> {
    pub fn new(client: &'a ContainerClient) -> Self {
        Self { client }
    }

    /// Check if a network exists.
    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .docker()
            .inspect_network(name, None::<bollard::network::InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the network `name` for `project` unless it exists.
    pub async fn ensure_network(&self, name: &str, project: &str) -> Result<()> {
        if self.network_exists(name).await? {
            debug!("Network {} already exists", name);
            return Ok(());
        }

        let labels: HashMap<&str, &str> =
            HashMap::from([(env::labels::MANAGED, "true"), (env::labels::PROJECT, project)]);

        match self
            .client
            .docker()
            .create_network(bollard::network::CreateNetworkOptions {
                name,
                driver: "bridge",
                labels,
                ..Default::default()
            })
            .await
        {
            Ok(response) => {
                info!("Created network: {} ({})", name, response.id);
                Ok(())
            }
            // 409: created concurrently by another start
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Connect a created container to `network` under `aliases`.
    pub async fn connect(
        &self,
        network: &str,
        container: &str,
        aliases: Vec<String>,
    ) -> Result<()> {
        debug!("Connecting {} to network {} as {:?}", container, network, aliases);
        self.client
            .docker()
            .connect_network(
                network,
                bollard::network::ConnectNetworkOptions {
                    container: container.to_string(),
                    endpoint_config: EndpointSettings {
                        aliases: Some(aliases),
                        ..Default::default()
                    },
                },
            )
            .await?;
        Ok(())
    }
}
