//! Container configuration builders.
//!
//! Provides a fluent API for the container configurations the engine creates:
//! service containers, one-off command containers and helper containers.

use crate::engine::{EngineError, Result};
use bollard::models::EndpointSettings;
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use std::collections::HashMap;

/// Container configuration builder.
#[derive(Debug, Default)]
pub struct ContainerConfigBuilder {
    image: Option<String>,
    cmd: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    working_dir: Option<String>,
    env: Vec<String>,
    labels: HashMap<String, String>,
    mounts: Vec<Mount>,
    network: Option<(String, Vec<String>)>,
    extra_hosts: Vec<String>,
    ports: Vec<u16>,
    user: Option<String>,
    interactive: bool,
    tty: bool,
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Set the entrypoint for the container.
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Set the working directory in the container.
    pub fn working_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in envs {
            self.env.push(format!("{}={}", k.into(), v.into()));
        }
        self
    }

    /// Add a label to the container.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Bind-mount a host path.
    pub fn bind(mut self, source: String, target: String, read_only: bool) -> Self {
        self.mounts.push(Mount {
            target: Some(target),
            source: Some(source),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(read_only),
            ..Default::default()
        });
        self
    }

    /// Mount an anonymous volume, hiding whatever a bind mount shows at `target`.
    pub fn anonymous_volume(mut self, target: String) -> Self {
        self.mounts.push(Mount {
            target: Some(target),
            typ: Some(MountTypeEnum::VOLUME),
            ..Default::default()
        });
        self
    }

    /// Attach to `network` at creation, resolvable there under `aliases`.
    pub fn network<S: Into<String>>(mut self, network: S, aliases: Vec<String>) -> Self {
        self.network = Some((network.into(), aliases));
        self
    }

    /// Make `hostname` resolve to the host machine.
    pub fn host_alias<S: AsRef<str>>(mut self, hostname: S) -> Self {
        self.extra_hosts.push(format!("{}:host-gateway", hostname.as_ref()));
        self
    }

    /// Publish `container_port/tcp` on a random loopback port.
    pub fn publish(mut self, container_port: u16) -> Self {
        self.ports.push(container_port);
        self
    }

    /// Set user to run as in the container.
    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Keep stdin open for attaching, with or without a TTY.
    pub fn interactive(mut self, tty: bool) -> Self {
        self.interactive = true;
        self.tty = tty;
        self
    }

    /// Build the container configuration.
    ///
    /// # Errors
    ///
    /// Returns error if no image was set.
    pub fn build(self) -> Result<ContainerConfig> {
        let image = self
            .image
            .filter(|i| !i.is_empty())
            .ok_or_else(|| EngineError::Config("Image is required".to_string()))?;

        let port_key = |port: &u16| format!("{}/tcp", port);
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = self
            .ports
            .iter()
            .map(|port| {
                let binding = PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(String::new()),
                };
                (port_key(port), Some(vec![binding]))
            })
            .collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            self.ports.iter().map(|port| (port_key(port), HashMap::new())).collect();

        let host_config = HostConfig {
            mounts: (!self.mounts.is_empty()).then_some(self.mounts),
            network_mode: self.network.as_ref().map(|(name, _)| name.clone()),
            extra_hosts: (!self.extra_hosts.is_empty()).then_some(self.extra_hosts),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            auto_remove: Some(false),
            ..Default::default()
        };

        let endpoints = self.network.map(|(name, aliases)| {
            let settings = EndpointSettings {
                aliases: (!aliases.is_empty()).then_some(aliases),
                ..Default::default()
            };
            HashMap::from([(name, settings)])
        });

        Ok(ContainerConfig {
            image,
            cmd: self.cmd,
            entrypoint: self.entrypoint,
            working_dir: self.working_dir,
            env: (!self.env.is_empty()).then_some(self.env),
            labels: self.labels,
            user: self.user,
            exposed_ports,
            endpoints,
            interactive: self.interactive,
            tty: self.tty,
            host_config,
        })
    }
}

/// Container configuration, ready for creation.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub env: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub user: Option<String>,
    exposed_ports: HashMap<String, HashMap<(), ()>>,
    endpoints: Option<HashMap<String, EndpointSettings>>,
    interactive: bool,
    tty: bool,
    pub host_config: HostConfig,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Whether the container gets a TTY.
    pub fn tty(&self) -> bool {
        self.tty
    }

    /// The bollard creation body.
    pub fn to_bollard(&self) -> bollard::container::Config<String> {
        bollard::container::Config {
            image: Some(self.image.clone()),
            cmd: self.cmd.clone(),
            entrypoint: self.entrypoint.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
            user: self.user.clone(),
            exposed_ports: (!self.exposed_ports.is_empty()).then(|| self.exposed_ports.clone()),
            attach_stdin: Some(self.interactive),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(self.interactive),
            stdin_once: Some(self.interactive),
            tty: Some(self.tty),
            host_config: Some(self.host_config.clone()),
            networking_config: self
                .endpoints
                .clone()
                .map(|endpoints_config| bollard::container::NetworkingConfig { endpoints_config }),
            ..Default::default()
        }
    }
}
