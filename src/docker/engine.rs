//! Docker/Podman engine backend.
//!
//! Services run as long-lived containers named after project and service,
//! commands as one-off containers removed when they exit. Every container of a
//! project joins the project network under its service name; containers also
//! join the networks of linked projects so resolution works both ways.

use super::client::ContainerClient;
use super::config::{ContainerConfig, ContainerConfigBuilder};
use super::executor::{self, ExecConfig};
use super::image;
use super::interactive::{self, stdin_is_terminal};
use super::network::NetworkManager;
use crate::config::{EngineConfig, Platform, SystemConfig};
use crate::engine::{
    Engine, EngineError, Result, TransitionLocks, UpdateFn, default_performance_for_auto, naming,
    require_normal_command, require_service, require_services, runtime_handle,
};
use crate::env;
use crate::path_guard::{self, ContainedPath};
use crate::project::{Command, Project, Service, VolumeMode, container_dir_for};
use crate::results::{MultiResultQueue, ResultSender, StartStopResultStep};
use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const START_STEPS: u32 = 5;
const ROOT_USER: &str = "0:0";
const HELPER_PROJECT_MOUNT: &str = "/project";
const HELPER_SOURCE_MOUNT: &str = "/from";
/// Exit code of the copy helper when the destination already exists.
const DESTINATION_EXISTS_EXIT: i64 = 17;

/// Engine backed by a Docker-compatible daemon.
///
/// The daemon connection is opened on first use, so loading the engine never
/// fails. Clones share the connection and the transition locks.
#[derive(Clone)]
pub struct DockerEngine {
    config: EngineConfig,
    client: Arc<OnceCell<ContainerClient>>,
    locks: TransitionLocks,
}

fn quote(value: &str) -> String {
    shell_escape::escape(Cow::Borrowed(value)).into_owned()
}

/// `uid:gid` of the owner of `path`.
#[cfg(unix)]
fn owner_of(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path)
        .ok()
        .map(|meta| format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> Option<String> {
    None
}

/// Shell script running `argv` with its output appended to the log files.
fn logging_script(argv: &[String], stdout: bool, stderr: bool) -> String {
    let mut script = format!(
        "exec {}",
        argv.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ")
    );
    if stdout {
        script.push_str(&format!(" 1>>{}/stdout.log", env::container::LOG_PATH));
    }
    if stderr {
        script.push_str(&format!(" 2>>{}/stderr.log", env::container::LOG_PATH));
    }
    script
}

/// Helper script copying `source` to `target`; refuses an existing target.
fn copy_script(source: &str, target: &str) -> String {
    let target_dir = target.rsplit_once('/').map_or(HELPER_PROJECT_MOUNT, |(dir, _)| dir);
    format!(
        "if [ -e {target} ] || [ -L {target} ]; then exit {code}; fi; \
         mkdir -p -- {dir} && cp -a -- {source} {target}",
        target = quote(target),
        code = DESTINATION_EXISTS_EXIT,
        dir = quote(target_dir),
        source = quote(source),
    )
}

/// Outcome of a privileged helper run.
fn helper_result(code: i64, output: &str) -> Result<()> {
    if code != 0 {
        return Err(EngineError::Backend(format!(
            "privileged helper exited with {}: {}",
            code,
            output.trim()
        )));
    }
    Ok(())
}

/// Container command of a foreground run.
///
/// `arguments` are appended to the service command, or to the image's default
/// command when the service has none. `None` keeps the image default.
fn foreground_cmd(
    service: &Service,
    arguments: &[String],
    image_cmd: &[String],
) -> Option<Vec<String>> {
    match service.command_line(arguments) {
        Some(line) => Some(vec![env::container::SHELL.to_string(), "-c".to_string(), line]),
        None if arguments.is_empty() => None,
        None => Some(image_cmd.iter().chain(arguments).cloned().collect()),
    }
}

impl DockerEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            client: Arc::new(OnceCell::new()),
            locks: TransitionLocks::default(),
        }
    }

    /// The daemon connection, opened on first call.
    pub async fn client(&self) -> Result<&ContainerClient> {
        self.client.get_or_try_init(ContainerClient::connect).await
    }

    fn network_name(&self, project_name: &str) -> String {
        naming::project_network(&self.config.name_prefix, project_name)
    }

    /// Labels and host aliases every container of `project` carries.
    fn base_builder(&self, project: &Project) -> ContainerConfigBuilder {
        let mut builder = ContainerConfig::builder()
            .label(env::labels::MANAGED, "true")
            .label(env::labels::PROJECT, &project.name);
        for hostname in self.config.host_hostnames() {
            builder = builder.host_alias(hostname);
        }
        builder
    }

    fn service_user(&self, project: &Project, service: &Service) -> Option<String> {
        if service.run_as_current_user {
            owner_of(&project.root)
        } else {
            None
        }
    }

    /// Container configuration of `service`, without its command.
    fn service_builder(
        &self,
        project: &Project,
        service: &Service,
        aliases: Vec<String>,
        unsynced: bool,
    ) -> ContainerConfigBuilder {
        let mut builder = self
            .base_builder(project)
            .image(&service.image)
            .network(self.network_name(&project.name), aliases)
            .envs(&service.environment);

        if service.mounts_src() {
            builder = builder.bind(
                project.src_path().to_string_lossy().into_owned(),
                env::container::SRC_PATH.to_string(),
                false,
            );
            if unsynced {
                for path in service.unimportant_container_paths() {
                    builder = builder.anonymous_volume(path);
                }
            }
        }
        for (host, container, mode) in service.resolved_additional_volumes(&project.root) {
            builder = builder.bind(
                host.to_string_lossy().into_owned(),
                container,
                mode == VolumeMode::Ro,
            );
        }
        if let Some(dir) = service.container_working_dir() {
            builder = builder.working_dir(dir);
        }
        if let Some(user) = self.service_user(project, service) {
            builder = builder.user(user);
        }
        builder
    }

    /// Set the service command, wrapped so its output lands in the log files
    /// when logging is on.
    async fn with_service_command(
        &self,
        client: &ContainerClient,
        project: &Project,
        service_name: &str,
        service: &Service,
        mut builder: ContainerConfigBuilder,
    ) -> Result<ContainerConfigBuilder> {
        if !service.logging.any() {
            if let Some(command) = &service.command {
                builder = builder.cmd([env::container::SHELL, "-c", command.as_str()]);
            }
            return Ok(builder);
        }

        let log_dir = env::service_log_dir_path(&project.root, service_name);
        std::fs::create_dir_all(&log_dir)?;
        builder = builder.bind(
            log_dir.to_string_lossy().into_owned(),
            env::container::LOG_PATH.to_string(),
            false,
        );

        let (entrypoint, default_cmd) = client.image_command(&service.image).await?;
        let cmd = match &service.command {
            Some(command) => vec![
                env::container::SHELL.to_string(),
                "-c".to_string(),
                command.clone(),
            ],
            None => default_cmd,
        };
        let argv: Vec<String> = entrypoint.into_iter().chain(cmd).collect();
        if argv.is_empty() {
            return Err(EngineError::Config(format!(
                "Service '{}' has no command and image {} has no default command",
                service_name, service.image
            )));
        }

        let script = logging_script(&argv, service.logging.stdout, service.logging.stderr);
        Ok(builder
            .entrypoint([env::container::SHELL, "-c"])
            .cmd([script]))
    }

    /// Create the networks of `project` and of every project it links to.
    async fn prepare_networks(&self, client: &ContainerClient, project: &Project) -> Result<()> {
        let manager = NetworkManager::new(client);
        manager
            .ensure_network(&self.network_name(&project.name), &project.name)
            .await?;
        for link in &project.links {
            manager.ensure_network(&self.network_name(link), link).await?;
        }
        Ok(())
    }

    /// Create a container and join it to the linked projects' networks.
    async fn create(
        &self,
        client: &ContainerClient,
        project: &Project,
        name: &str,
        config: &ContainerConfig,
        aliases: &[String],
    ) -> Result<()> {
        debug!("Creating container {} from {}", name, config.image);
        client
            .docker()
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name,
                    ..Default::default()
                }),
                config.to_bollard(),
            )
            .await?;

        let manager = NetworkManager::new(client);
        for link in &project.links {
            if let Err(e) = manager
                .connect(&self.network_name(link), name, aliases.to_vec())
                .await
            {
                client.remove_container(name).await?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Start a created container, wait for it and collect its output. The
    /// container is removed afterwards in every case.
    async fn run_to_completion(
        &self,
        client: &ContainerClient,
        name: &str,
    ) -> Result<(i64, String)> {
        let result = async {
            client.start_container(name).await?;
            let code = client.wait_container(name).await?;
            let output = client.logs(name).await?;
            Ok((code, output))
        }
        .await;
        if let Err(e) = client.remove_container(name).await {
            warn!("Failed to remove container {}: {}", name, e);
        }
        result
    }

    async fn ensure_image(&self, client: &ContainerClient, image_name: &str) -> Result<()> {
        if self.config.auto_pull {
            image::ensure_image(client, image_name).await
        } else {
            Ok(())
        }
    }

    async fn running_container(
        &self,
        client: &ContainerClient,
        project: &Project,
        service_name: &str,
    ) -> Result<String> {
        let name = self.container_name_for(project, service_name);
        if client.is_running(&name).await? {
            Ok(name)
        } else {
            Err(EngineError::not_running(project, service_name))
        }
    }

    async fn run_pre_start_hooks(
        &self,
        client: &ContainerClient,
        project: &Project,
        service_name: &str,
        service: &Service,
        unsynced: bool,
    ) -> Result<()> {
        for hook in &service.pre_start {
            let name =
                naming::command_container(&self.config.name_prefix, &project.name, service_name);
            let config = self
                .service_builder(project, service, Vec::new(), unsynced)
                .label(env::labels::SERVICE, service_name)
                .cmd([env::container::SHELL, "-c", hook.as_str()])
                .build()?;
            info!("Running pre start hook of {}: {}", service_name, hook);
            self.create(client, project, &name, &config, &[]).await?;
            let (code, output) = self.run_to_completion(client, &name).await?;
            if code != 0 {
                return Err(EngineError::Backend(format!(
                    "pre start hook '{}' exited with {}: {}",
                    hook,
                    code,
                    output.trim()
                )));
            }
        }
        Ok(())
    }

    async fn run_post_start_hooks(
        &self,
        client: &ContainerClient,
        project: &Project,
        container: &str,
        service: &Service,
    ) -> Result<()> {
        for hook in &service.post_start {
            info!("Running post start hook in {}: {}", container, hook);
            let mut exec = ExecConfig::shell(hook);
            if let Some(dir) = service.container_working_dir() {
                exec = exec.working_dir(dir);
            }
            if let Some(user) = self.service_user(project, service) {
                exec = exec.user(user);
            }
            let output = executor::execute(client.docker(), container, &exec.build()).await?;
            if !output.success() {
                return Err(EngineError::Backend(format!(
                    "post start hook '{}' exited with {}: {}",
                    hook,
                    output.exit_code.unwrap_or(-1),
                    output.combined().trim()
                )));
            }
        }
        Ok(())
    }

    async fn start_service(
        &self,
        project: &Project,
        service_name: &str,
        service: &Service,
        unsynced: bool,
        tx: &ResultSender<StartStopResultStep>,
    ) -> Result<String> {
        let name = self.container_name_for(project, service_name);
        let _guard = self.locks.acquire(&name).await;
        let client = self.client().await?;

        if client.is_running(&name).await? {
            return Ok("already running".to_string());
        }
        // leftover from a crash or an external stop
        client.remove_container(&name).await?;

        tx.send(StartStopResultStep::progress(
            service_name,
            1,
            Some(START_STEPS),
            format!("checking image {}", service.image),
        ));
        self.ensure_image(client, &service.image).await?;

        tx.send(StartStopResultStep::progress(
            service_name,
            2,
            Some(START_STEPS),
            "preparing networks",
        ));
        self.prepare_networks(client, project).await?;

        if !service.pre_start.is_empty() {
            tx.send(StartStopResultStep::progress(
                service_name,
                3,
                Some(START_STEPS),
                "running pre start hooks",
            ));
            self.run_pre_start_hooks(client, project, service_name, service, unsynced)
                .await?;
        }

        tx.send(StartStopResultStep::progress(
            service_name,
            4,
            Some(START_STEPS),
            "creating container",
        ));
        let aliases = vec![service_name.to_string()];
        let mut builder = self
            .service_builder(project, service, aliases.clone(), unsynced)
            .label(env::labels::SERVICE, service_name);
        if let Some(port) = service.port {
            builder = builder.publish(port);
        }
        let config = self
            .with_service_command(client, project, service_name, service, builder)
            .await?
            .build()?;
        self.create(client, project, &name, &config, &aliases).await?;

        tx.send(StartStopResultStep::progress(
            service_name,
            5,
            Some(START_STEPS),
            "starting container",
        ));
        if let Err(e) = client.start_container(&name).await {
            client.remove_container(&name).await?;
            return Err(e);
        }
        if let Err(e) = self.run_post_start_hooks(client, project, &name, service).await {
            client.stop_container(&name, self.config.stop_timeout).await?;
            client.remove_container(&name).await?;
            return Err(e);
        }
        Ok("started".to_string())
    }

    async fn stop_service(
        &self,
        project: &Project,
        service_name: &str,
        tx: &ResultSender<StartStopResultStep>,
    ) -> Result<String> {
        let name = self.container_name_for(project, service_name);
        let _guard = self.locks.acquire(&name).await;
        let client = self.client().await?;

        if !client.is_running(&name).await? {
            client.remove_container(&name).await?;
            return Ok("not running".to_string());
        }
        tx.send(StartStopResultStep::progress(service_name, 1, Some(1), "stopping container"));
        client.stop_container(&name, self.config.stop_timeout).await?;
        client.remove_container(&name).await?;
        Ok("stopped".to_string())
    }

    /// Attach to a one-off container built from `config` and remove it once
    /// it exits.
    async fn run_attached_once(
        &self,
        client: &ContainerClient,
        project: &Project,
        name: &str,
        config: &ContainerConfig,
        aliases: &[String],
    ) -> Result<i64> {
        self.ensure_image(client, &config.image).await?;
        self.prepare_networks(client, project).await?;
        self.create(client, project, name, config, aliases).await?;
        let result = interactive::run_attached(client, name, config.tty(), None, None).await;
        if let Err(e) = client.remove_container(name).await {
            warn!("Failed to remove container {}: {}", name, e);
        }
        result
    }

    /// Run `script` as root in a helper container with the given bind mounts.
    /// Run `script` as root in a helper container; returns exit code and output.
    async fn run_privileged(
        &self,
        mounts: Vec<(String, String, bool)>,
        script: String,
    ) -> Result<(i64, String)> {
        let client = self.client().await?;
        let name = naming::helper_container(&self.config.name_prefix);
        let mut builder = ContainerConfig::builder()
            .image(&self.config.helper_image)
            .label(env::labels::MANAGED, "true")
            .user(ROOT_USER)
            .cmd([env::container::SHELL.to_string(), "-c".to_string(), script]);
        for (source, target, read_only) in mounts {
            builder = builder.bind(source, target, read_only);
        }
        let config = builder.build()?;

        image::ensure_image(client, &config.image).await?;
        debug!("Running privileged helper {}", name);
        client
            .docker()
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: name.as_str(),
                    ..Default::default()
                }),
                config.to_bollard(),
            )
            .await?;
        self.run_to_completion(client, &name).await
    }

    /// Container path of `path` inside the helper's project mount.
    fn helper_path(path: &ContainedPath) -> String {
        let relative = path
            .relative()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if relative.is_empty() {
            HELPER_PROJECT_MOUNT.to_string()
        } else {
            format!("{}/{}", HELPER_PROJECT_MOUNT, relative)
        }
    }
}

fn is_permission_denied(e: &EngineError) -> bool {
    matches!(e, EngineError::Io(err) if err.kind() == io::ErrorKind::PermissionDenied)
}

#[async_trait]
impl Engine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn start_project(
        &self,
        project: &Project,
        services: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<MultiResultQueue<StartStopResultStep>> {
        require_services(project, services)?;
        let handle = runtime_handle()?;
        info!("Starting {:?} of project '{}'", services, project.name);

        let (tx, queue) = MultiResultQueue::channel(services.iter().cloned());
        for service_name in services {
            let engine = self.clone();
            let project = project.clone();
            let service_name = service_name.clone();
            let tx = tx.clone();
            handle.spawn(async move {
                let Some(service) = project.service(&service_name) else {
                    return;
                };
                let step = match engine
                    .start_service(
                        &project,
                        &service_name,
                        service,
                        unimportant_paths_unsynced,
                        &tx,
                    )
                    .await
                {
                    Ok(message) => StartStopResultStep::succeeded(&service_name, message),
                    Err(e) => {
                        warn!("Failed to start {}: {}", service_name, e);
                        StartStopResultStep::failure(&service_name, e.to_string())
                    }
                };
                tx.send(step);
            });
        }
        Ok(queue)
    }

    fn stop_project(
        &self,
        project: &Project,
        services: &[String],
    ) -> Result<MultiResultQueue<StartStopResultStep>> {
        require_services(project, services)?;
        let handle = runtime_handle()?;
        info!("Stopping {:?} of project '{}'", services, project.name);

        let (tx, queue) = MultiResultQueue::channel(services.iter().cloned());
        for service_name in services {
            let engine = self.clone();
            let project = project.clone();
            let service_name = service_name.clone();
            let tx = tx.clone();
            handle.spawn(async move {
                let step = match engine.stop_service(&project, &service_name, &tx).await {
                    Ok(message) => StartStopResultStep::succeeded(&service_name, message),
                    Err(e) => {
                        warn!("Failed to stop {}: {}", service_name, e);
                        StartStopResultStep::failure(&service_name, e.to_string())
                    }
                };
                tx.send(step);
            });
        }
        Ok(queue)
    }

    async fn status(
        &self,
        project: &Project,
        _system_config: &SystemConfig,
    ) -> Result<BTreeMap<String, bool>> {
        let client = self.client().await?;
        let mut status = BTreeMap::new();
        for service_name in project.services.keys() {
            let running = client
                .is_running(&self.container_name_for(project, service_name))
                .await?;
            status.insert(service_name.clone(), running);
        }
        Ok(status)
    }

    async fn service_status(
        &self,
        project: &Project,
        service_name: &str,
        _system_config: &SystemConfig,
    ) -> Result<bool> {
        require_service(project, service_name)?;
        self.client()
            .await?
            .is_running(&self.container_name_for(project, service_name))
            .await
    }

    fn container_name_for(&self, project: &Project, service_name: &str) -> String {
        naming::service_container(&self.config.name_prefix, &project.name, service_name)
    }

    async fn address_for(
        &self,
        project: &Project,
        service_name: &str,
    ) -> Result<Option<(String, u16)>> {
        let Some(port) = project.service(service_name).and_then(|s| s.port) else {
            return Ok(None);
        };
        let client = self.client().await?;
        let name = self.container_name_for(project, service_name);
        if !client.is_running(&name).await? {
            return Ok(None);
        }
        Ok(client
            .published_port(&name, port)
            .await?
            .map(|host_port| ("127.0.0.1".to_string(), host_port)))
    }

    async fn cmd(
        &self,
        project: &Project,
        command_name: &str,
        arguments: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<i64> {
        let command = require_normal_command(project, command_name)?;
        let image = command
            .image
            .as_deref()
            .ok_or_else(|| {
                EngineError::Config(format!("Command '{}' has no image", command_name))
            })?;
        let client = self.client().await?;

        let cwd = std::env::current_dir()?;
        let src = project.src_path();
        let tty = stdin_is_terminal();
        let aliases = vec![command_name.to_string()];
        let mut builder = self
            .base_builder(project)
            .image(image)
            .label(env::labels::COMMAND, command_name)
            .network(self.network_name(&project.name), aliases.clone())
            .envs(&command.environment)
            .bind(
                src.to_string_lossy().into_owned(),
                env::container::SRC_PATH.to_string(),
                false,
            )
            .working_dir(container_dir_for(&src, &cwd))
            .interactive(tty);
        if unimportant_paths_unsynced {
            for service in project.services.values() {
                for path in service.unimportant_container_paths() {
                    builder = builder.anonymous_volume(path);
                }
            }
        }
        if let Some(user) = owner_of(&project.root) {
            builder = builder.user(user);
        }
        if let Some(line) = command.command_line(arguments) {
            builder = builder.cmd([env::container::SHELL.to_string(), "-c".to_string(), line]);
        }
        let config = builder.build()?;

        let name = naming::command_container(&self.config.name_prefix, &project.name, command_name);
        info!("Running command {} in {}", command_name, name);
        self.run_attached_once(client, project, &name, &config, &aliases)
            .await
    }

    async fn cmd_in_service(
        &self,
        project: &Project,
        command_name: &str,
        service_name: &str,
        arguments: &[String],
    ) -> Result<i64> {
        let command = project
            .command(command_name)
            .ok_or_else(|| EngineError::command_not_found(project, command_name))?;
        let service = require_service(project, service_name)?;
        let line = command
            .command_line(arguments)
            .ok_or_else(|| {
                EngineError::Config(format!("Command '{}' has no command line", command_name))
            })?;
        let client = self.client().await?;
        let container = self.running_container(client, project, service_name).await?;

        let mut exec = ExecConfig::shell(&line);
        for (key, value) in &command.environment {
            exec = exec.env(key, value);
        }
        if let Some(dir) = service.container_working_dir() {
            exec = exec.working_dir(dir);
        }
        if let Some(user) = self.service_user(project, service) {
            exec = exec.user(user);
        }
        info!("Running command {} in {}", command_name, container);
        interactive::exec_attached(client, &container, &exec.build(), None, None).await
    }

    async fn service_fg(
        &self,
        project: &Project,
        service_name: &str,
        arguments: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<()> {
        let service = require_service(project, service_name)?;
        let client = self.client().await?;
        let cwd = std::env::current_dir()?;
        let foreground = service.foreground_variant(&project.src_path(), &cwd);

        let aliases = vec![service_name.to_string()];
        let mut builder = self
            .service_builder(project, &foreground, aliases.clone(), unimportant_paths_unsynced)
            .label(env::labels::SERVICE, service_name)
            .interactive(stdin_is_terminal());
        if let Some(port) = foreground.port {
            builder = builder.publish(port);
        }
        let image_cmd = if foreground.command.is_none() && !arguments.is_empty() {
            client.image_command(&foreground.image).await?.1
        } else {
            Vec::new()
        };
        if let Some(cmd) = foreground_cmd(&foreground, arguments, &image_cmd) {
            builder = builder.cmd(cmd);
        }
        let config = builder.build()?;

        let name = naming::command_container(&self.config.name_prefix, &project.name, service_name);
        info!("Running {} in the foreground as {}", service_name, name);
        let code = self
            .run_attached_once(client, project, &name, &config, &aliases)
            .await?;
        debug!("Foreground {} exited with {}", service_name, code);
        Ok(())
    }

    async fn cmd_detached(
        &self,
        project: &Project,
        command: &Command,
        run_as_root: bool,
    ) -> Result<(i64, String)> {
        let image = command
            .image
            .as_deref()
            .ok_or_else(|| EngineError::Config("Detached command has no image".to_string()))?;
        let client = self.client().await?;

        let mut builder = self
            .base_builder(project)
            .image(image)
            .label(env::labels::COMMAND, "detached")
            .network(self.network_name(&project.name), Vec::new())
            .envs(&command.environment);
        let user = if run_as_root {
            Some(ROOT_USER.to_string())
        } else {
            owner_of(&project.root)
        };
        if let Some(user) = user {
            builder = builder.user(user);
        }
        if let Some(line) = command.command_line(&[]) {
            builder = builder.cmd([env::container::SHELL.to_string(), "-c".to_string(), line]);
        }
        let config = builder.build()?;

        self.ensure_image(client, image).await?;
        self.prepare_networks(client, project).await?;
        let name = naming::command_container(&self.config.name_prefix, &project.name, "detached");
        self.create(client, project, &name, &config, &[]).await?;
        self.run_to_completion(client, &name).await
    }

    async fn exec(
        &self,
        project: &Project,
        service_name: &str,
        cols: Option<u16>,
        lines: Option<u16>,
        root: bool,
    ) -> Result<()> {
        let service = require_service(project, service_name)?;
        let client = self.client().await?;
        let container = self.running_container(client, project, service_name).await?;

        let mut exec = ExecConfig::builder().cmd([env::container::SHELL]);
        if let Some(dir) = service.container_working_dir() {
            exec = exec.working_dir(dir);
        }
        let user = if root {
            Some(ROOT_USER.to_string())
        } else {
            self.service_user(project, service)
        };
        if let Some(user) = user {
            exec = exec.user(user);
        }
        interactive::exec_attached(client, &container, &exec.build(), cols, lines).await?;
        Ok(())
    }

    async fn exec_custom(
        &self,
        project: &Project,
        service_name: &str,
        command: &str,
        cols: Option<u16>,
        lines: Option<u16>,
        root: bool,
    ) -> Result<()> {
        let service = require_service(project, service_name)?;
        let client = self.client().await?;
        let container = self.running_container(client, project, service_name).await?;

        let mut exec = ExecConfig::shell(command);
        if let Some(dir) = service.container_working_dir() {
            exec = exec.working_dir(dir);
        }
        let user = if root {
            Some(ROOT_USER.to_string())
        } else {
            self.service_user(project, service)
        };
        if let Some(user) = user {
            exec = exec.user(user);
        }
        let code =
            interactive::exec_attached(client, &container, &exec.build(), cols, lines).await?;
        debug!("Custom exec in {} exited with {}", container, code);
        Ok(())
    }

    async fn pull_images(
        &self,
        project: &Project,
        line_reset: &str,
        update_func: UpdateFn<'_>,
    ) -> Result<()> {
        let client = self.client().await?;
        image::pull_all(client, &project.images(), line_reset, update_func).await
    }

    async fn remove_contained(&self, path: &ContainedPath) -> Result<()> {
        match path_guard::remove(path) {
            Err(e) if is_permission_denied(&e) => {
                warn!("Removing {:?} needs elevated rights: {}", path.as_path(), e);
                let target = Self::helper_path(path);
                let script = if target == HELPER_PROJECT_MOUNT {
                    format!("find {} -mindepth 1 -delete", HELPER_PROJECT_MOUNT)
                } else {
                    format!("rm -rf -- {}", quote(&target))
                };
                let mounts = vec![(
                    path.project_root().to_string_lossy().into_owned(),
                    HELPER_PROJECT_MOUNT.to_string(),
                    false,
                )];
                let (code, output) = self.run_privileged(mounts, script).await?;
                helper_result(code, &output)
            }
            other => other,
        }
    }

    async fn copy_into_contained(&self, from: &Path, to: &ContainedPath) -> Result<()> {
        match path_guard::copy(from, to) {
            Err(e) if is_permission_denied(&e) => {
                warn!("Copying to {:?} needs elevated rights: {}", to.as_path(), e);
                let source = path_guard::resolve(from)?;
                let (Some(source_dir), Some(source_name)) = (source.parent(), source.file_name())
                else {
                    return Err(EngineError::Permission(format!("Cannot copy {}", from.display())));
                };
                let source_path =
                    format!("{}/{}", HELPER_SOURCE_MOUNT, source_name.to_string_lossy());
                let script = copy_script(&source_path, &Self::helper_path(to));
                let mounts = vec![
                    (
                        source_dir.to_string_lossy().into_owned(),
                        HELPER_SOURCE_MOUNT.to_string(),
                        true,
                    ),
                    (
                        to.project_root().to_string_lossy().into_owned(),
                        HELPER_PROJECT_MOUNT.to_string(),
                        false,
                    ),
                ];
                match self.run_privileged(mounts, script).await? {
                    (DESTINATION_EXISTS_EXIT, _) => {
                        Err(EngineError::DestinationExists(to.as_path().to_path_buf()))
                    }
                    (code, output) => helper_result(code, &output),
                }
            }
            other => other,
        }
    }

    fn performance_value_for_auto(&self, key: &str, platform: Platform) -> bool {
        default_performance_for_auto(key, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Logging;
    use std::path::PathBuf;

    fn project() -> Project {
        Project::new("shop", "/work/shop")
            .with_service(
                "web",
                Service::new("nginx:alpine").with_role(crate::project::Role::Src).with_port(80),
            )
            .with_link("payments")
    }

    #[test]
    fn test_logging_script() {
        let argv = vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()];
        assert_eq!(
            logging_script(&argv, true, true),
            "exec nginx -g 'daemon off;' 1>>/devstack_logs/stdout.log 2>>/devstack_logs/stderr.log"
        );
        assert_eq!(
            logging_script(&argv, false, true),
            "exec nginx -g 'daemon off;' 2>>/devstack_logs/stderr.log"
        );
    }

    #[test]
    fn test_naming_uses_prefix() {
        let engine = DockerEngine::new(EngineConfig::default());
        let project = project();
        assert_eq!(engine.container_name_for(&project, "web"), "devstack-shop-web");
        assert_eq!(engine.network_name("shop"), "devstack-shop--net");
    }

    #[test]
    fn test_service_container_config() {
        let engine = DockerEngine::new(EngineConfig::default());
        let project = project();
        let service = project.service("web").unwrap();
        let config = engine
            .service_builder(&project, service, vec!["web".to_string()], false)
            .build()
            .unwrap();

        assert_eq!(config.image, "nginx:alpine");
        assert_eq!(config.working_dir.as_deref(), Some("/src"));
        assert_eq!(config.labels.get(env::labels::PROJECT).map(String::as_str), Some("shop"));
        let extra_hosts = config.host_config.extra_hosts.clone().unwrap();
        assert!(extra_hosts.contains(&"host.devstack.internal:host-gateway".to_string()));
        let mounts = config.host_config.mounts.clone().unwrap();
        assert!(mounts.iter().any(|m| m.target.as_deref() == Some("/src")));
        assert_eq!(config.host_config.network_mode.as_deref(), Some("devstack-shop--net"));
    }

    #[test]
    fn test_unsynced_paths_become_anonymous_volumes() {
        let engine = DockerEngine::new(EngineConfig::default());
        let mut service = Service::new("node").with_role(crate::project::Role::Src);
        service.unimportant_paths = vec!["node_modules".to_string()];
        let project = Project::new("shop", "/work/shop").with_service("app", service.clone());

        let synced = engine.service_builder(&project, &service, Vec::new(), false).build().unwrap();
        let unsynced = engine
            .service_builder(&project, &service, Vec::new(), true)
            .build()
            .unwrap();
        let targets = |c: &ContainerConfig| -> Vec<String> {
            c.host_config
                .mounts
                .clone()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.target)
                .collect()
        };
        assert!(!targets(&synced).contains(&"/src/node_modules".to_string()));
        assert!(targets(&unsynced).contains(&"/src/node_modules".to_string()));
    }

    #[test]
    fn test_foreground_arguments_are_appended() {
        let engine = DockerEngine::new(EngineConfig::default());
        let project = project();
        let worker = Service::new("php:8").with_command("php worker.php");
        let arguments = vec!["--queue".to_string(), "mail jobs".to_string()];

        let cmd = foreground_cmd(&worker, &arguments, &[]).unwrap();
        let config = engine
            .service_builder(&project, &worker, Vec::new(), false)
            .cmd(cmd)
            .build()
            .unwrap();
        assert_eq!(
            config.cmd,
            Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "php worker.php --queue 'mail jobs'".to_string()
            ])
        );

        let image_default = vec!["nginx".to_string(), "-g".to_string()];
        assert_eq!(
            foreground_cmd(&Service::new("nginx"), &["daemon off;".to_string()], &image_default),
            Some(vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()])
        );
        assert_eq!(foreground_cmd(&Service::new("nginx"), &[], &image_default), None);
    }

    #[test]
    fn test_copy_script_refuses_existing_target() {
        let script = copy_script("/from/tree", "/project/copies/tree");
        assert!(script.starts_with(
            "if [ -e /project/copies/tree ] || [ -L /project/copies/tree ]; then exit 17; fi;"
        ));
        assert!(script.ends_with(
            "mkdir -p -- /project/copies && cp -a -- /from/tree /project/copies/tree"
        ));
        assert!(!script.contains("rm "));
    }

    #[test]
    fn test_helper_result() {
        assert!(helper_result(0, "").is_ok());
        let err = helper_result(1, "cp: permission denied\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend error: privileged helper exited with 1: cp: permission denied"
        );
    }

    #[test]
    fn test_helper_path() {
        let root = PathBuf::from("/");
        let project = Project::new("root", &root);
        let contained = path_guard::contain(&root, &project).unwrap();
        assert_eq!(DockerEngine::helper_path(&contained), "/project");
    }

    #[test]
    fn test_permission_denied_detection() {
        let denied = EngineError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(is_permission_denied(&denied));
        assert!(!is_permission_denied(&EngineError::Permission("outside".to_string())));
    }

    #[test]
    fn test_logging_default_is_off() {
        assert!(!Logging::default().any());
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman
    async fn test_stop_of_unknown_container_is_idempotent() {
        let engine = DockerEngine::new(EngineConfig::default());
        let project = Project::new(format!("t{}", uuid::Uuid::new_v4().simple()), "/tmp")
            .with_service("web", Service::new("nginx:alpine"));
        let results = engine
            .stop_project(&project, &["web".to_string()])
            .unwrap()
            .terminal_results()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
    }
}
