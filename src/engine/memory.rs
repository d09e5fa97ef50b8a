//! In-process engine backend.
//!
//! Models containers, networks and images as plain data so the lifecycle
//! contract can be exercised without a container daemon. Networking follows
//! the same rules as a real backend: a container resolves another by service
//! name when both are running and share a network, and every host bridge
//! hostname resolves from every container.
//!
//! Failures are injected per service ([`MemoryEngine::fail_start`]) or per
//! image ([`MemoryEngine::mark_image_missing`]).

use super::{
    EngineError, Result, ServiceState, TransitionLocks, UpdateFn, default_performance_for_auto,
    naming, require_normal_command, require_service, require_services, runtime_handle,
};
use crate::config::{EngineConfig, Platform, SystemConfig};
use crate::env;
use crate::project::{Command, Project, Service, append_arguments};
use crate::results::{MultiResultQueue, ResultSender, StartStopResultStep};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const FIRST_HOST_PORT: u16 = 32768;

/// Snapshot of one modelled container.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainer {
    pub project: String,
    pub service: String,
    pub image: String,
    pub state: ServiceState,
    pub environment: BTreeMap<String, String>,
    /// Networks joined, each with the service name as alias
    pub networks: BTreeSet<String>,
    /// Hostnames resolving to the host machine
    pub host_aliases: Vec<String>,
    /// Container paths whose writes stay in the container
    pub unsynced_paths: Vec<String>,
    pub working_dir: Option<String>,
    /// Host port the service port is published on
    pub host_port: Option<u16>,
    /// Times the container went from stopped to running
    pub start_count: u32,
}

/// One recorded blocking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub operation: &'static str,
    pub container: String,
    pub command_line: Option<String>,
    pub root: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: HashMap<String, MemoryContainer>,
    networks: BTreeSet<String>,
    failing: HashSet<String>,
    missing_images: HashSet<String>,
    exit_codes: HashMap<String, i64>,
    invocations: Vec<Invocation>,
    next_host_port: u16,
}

/// Engine backend keeping all state in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    config: EngineConfig,
    state: Arc<Mutex<MemoryState>>,
    locks: TransitionLocks,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MemoryState {
                next_host_port: FIRST_HOST_PORT,
                ..MemoryState::default()
            })),
            locks: TransitionLocks::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Backend(format!("mutex poisoned: {e}")))
    }

    /// Make every future start of `service` in `project` fail.
    pub fn fail_start(&self, project: &Project, service: &str) {
        let name = self.container_name(project, service);
        if let Ok(mut state) = self.lock() {
            state.failing.insert(name);
        }
    }

    /// Treat `image` as absent from every registry.
    pub fn mark_image_missing(&self, image: &str) {
        if let Ok(mut state) = self.lock() {
            state.missing_images.insert(image.to_string());
        }
    }

    /// Exit code returned by every run whose command line starts with `command`.
    pub fn set_exit_code(&self, command: &str, code: i64) {
        if let Ok(mut state) = self.lock() {
            state.exit_codes.insert(command.to_string(), code);
        }
    }

    /// Current snapshot of a service's container, if it was ever created.
    pub fn container(&self, project: &Project, service: &str) -> Option<MemoryContainer> {
        let name = self.container_name(project, service);
        self.lock().ok()?.containers.get(&name).cloned()
    }

    /// Value of `key` in the environment of a service's running container.
    pub fn container_env(&self, project: &Project, service: &str, key: &str) -> Option<String> {
        self.container(project, service)
            .filter(|c| c.state.is_running())?
            .environment
            .get(key)
            .cloned()
    }

    /// Whether a process in `service`'s container can resolve `hostname`.
    pub fn can_reach(&self, project: &Project, service: &str, hostname: &str) -> bool {
        let name = self.container_name(project, service);
        let Ok(state) = self.lock() else {
            return false;
        };
        let Some(source) = state.containers.get(&name).filter(|c| c.state.is_running()) else {
            return false;
        };
        if source.host_aliases.iter().any(|h| h == hostname) {
            return true;
        }
        state.containers.values().any(|target| {
            target.state.is_running()
                && target.service == hostname
                && !target.networks.is_disjoint(&source.networks)
        })
    }

    /// Networks created so far.
    pub fn networks(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.networks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Blocking calls recorded so far, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().map(|s| s.invocations.clone()).unwrap_or_default()
    }

    fn container_name(&self, project: &Project, service: &str) -> String {
        naming::service_container(&self.config.name_prefix, &project.name, service)
    }

    fn networks_for(&self, project: &Project) -> BTreeSet<String> {
        std::iter::once(&project.name)
            .chain(project.links.iter())
            .map(|p| naming::project_network(&self.config.name_prefix, p))
            .collect()
    }

    fn record(
        &self,
        operation: &'static str,
        container: String,
        command_line: Option<String>,
        root: bool,
    ) -> Result<()> {
        debug!("{} in {}: {:?}", operation, container, command_line);
        self.lock()?.invocations.push(Invocation {
            operation,
            container,
            command_line,
            root,
        });
        Ok(())
    }

    fn exit_code_for(&self, command_line: Option<&str>) -> Result<i64> {
        let state = self.lock()?;
        Ok(command_line
            .and_then(|line| {
                state
                    .exit_codes
                    .iter()
                    .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                    .map(|(_, code)| *code)
            })
            .unwrap_or(0))
    }

    fn require_running(&self, project: &Project, service: &str) -> Result<String> {
        require_service(project, service)?;
        let name = self.container_name(project, service);
        let running = self
            .lock()?
            .containers
            .get(&name)
            .is_some_and(|c| c.state.is_running());
        if !running {
            return Err(EngineError::not_running(project, service));
        }
        Ok(name)
    }

    fn prepare_log_dir(project: &Project, service_name: &str, service: &Service) -> Result<()> {
        if service.logging.any() {
            let dir = env::service_log_dir_path(&project.root, service_name);
            fs::create_dir_all(&dir)?;
            if service.logging.stdout {
                fs::OpenOptions::new().create(true).append(true).open(dir.join("stdout.log"))?;
            }
            if service.logging.stderr {
                fs::OpenOptions::new().create(true).append(true).open(dir.join("stderr.log"))?;
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
        let name = self.container_name(project, service_name);
        let _guard = self.locks.acquire(&name).await;

        {
            let mut state = self.lock()?;
            if let Some(container) = state.containers.get_mut(&name) {
                match container.state.begin_start() {
                    None => return Ok("already running".to_string()),
                    Some(next) => container.state = next,
                }
            }
        }

        const STEPS: u32 = 4;
        tx.send(StartStopResultStep::progress(
            service_name,
            1,
            Some(STEPS),
            format!("checking image {}", service.image),
        ));
        tokio::task::yield_now().await;
        if self.lock()?.missing_images.contains(&service.image) {
            self.reset_to_stopped(&name)?;
            return Err(EngineError::Backend(format!("image {} not found", service.image)));
        }

        tx.send(StartStopResultStep::progress(service_name, 2, Some(STEPS), "preparing networks"));
        let networks = self.networks_for(project);
        self.lock()?.networks.extend(networks.iter().cloned());

        if !service.pre_start.is_empty() {
            tx.send(StartStopResultStep::progress(
                service_name,
                3,
                Some(STEPS),
                "running pre start hooks",
            ));
            for hook in &service.pre_start {
                self.record("pre_start", name.clone(), Some(hook.clone()), false)?;
                let code = self.exit_code_for(Some(hook))?;
                if code != 0 {
                    self.reset_to_stopped(&name)?;
                    return Err(EngineError::Backend(format!(
                        "pre start hook '{}' exited with {}",
                        hook, code
                    )));
                }
            }
        }

        tx.send(StartStopResultStep::progress(
            service_name,
            STEPS,
            Some(STEPS),
            "starting container",
        ));
        tokio::task::yield_now().await;
        if let Err(e) = Self::prepare_log_dir(project, service_name, service) {
            self.reset_to_stopped(&name)?;
            return Err(e);
        }
        {
            let mut state = self.lock()?;
            if state.failing.contains(&name) {
                drop(state);
                self.reset_to_stopped(&name)?;
                return Err(EngineError::Backend(format!(
                    "container {} exited during startup",
                    name
                )));
            }
            let host_port = match service.port {
                Some(_) => {
                    let port = state.next_host_port;
                    state.next_host_port =
                        state.next_host_port.wrapping_add(1).max(FIRST_HOST_PORT);
                    Some(port)
                }
                None => None,
            };
            let start_count = state.containers.get(&name).map_or(0, |c| c.start_count) + 1;
            state.containers.insert(
                name.clone(),
                MemoryContainer {
                    project: project.name.clone(),
                    service: service_name.to_string(),
                    image: service.image.clone(),
                    state: ServiceState::Running,
                    environment: service.environment.clone(),
                    networks,
                    host_aliases: self.config.host_hostnames(),
                    unsynced_paths: if unsynced {
                        service.unimportant_container_paths()
                    } else {
                        Vec::new()
                    },
                    working_dir: service.container_working_dir(),
                    host_port,
                    start_count,
                },
            );
        }

        for hook in &service.post_start {
            self.record("post_start", name.clone(), Some(hook.clone()), false)?;
            let code = self.exit_code_for(Some(hook))?;
            if code != 0 {
                self.reset_to_stopped(&name)?;
                return Err(EngineError::Backend(format!(
                    "post start hook '{}' exited with {}",
                    hook, code
                )));
            }
        }
        Ok("started".to_string())
    }

    fn reset_to_stopped(&self, name: &str) -> Result<()> {
        if let Some(container) = self.lock()?.containers.get_mut(name) {
            container.state = ServiceState::Stopped;
        }
        Ok(())
    }

    async fn stop_service(
        &self,
        project: &Project,
        service_name: &str,
        tx: &ResultSender<StartStopResultStep>,
    ) -> Result<String> {
        let name = self.container_name(project, service_name);
        let _guard = self.locks.acquire(&name).await;
        {
            let mut state = self.lock()?;
            let Some(container) = state.containers.get_mut(&name) else {
                return Ok("not running".to_string());
            };
            match container.state.begin_stop() {
                None => return Ok("not running".to_string()),
                Some(next) => container.state = next,
            }
        }
        tx.send(StartStopResultStep::progress(service_name, 1, Some(1), "stopping container"));
        tokio::task::yield_now().await;
        if let Some(container) = self.lock()?.containers.get_mut(&name) {
            container.state = container.state.settle();
        }
        Ok("stopped".to_string())
    }
}

#[async_trait]
impl super::Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
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
                    Err(e) => StartStopResultStep::failure(&service_name, e.to_string()),
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
        let state = self.lock()?;
        Ok(project
            .services
            .keys()
            .map(|service| {
                let name = self.container_name(project, service);
                let running = state.containers.get(&name).is_some_and(|c| c.state.is_running());
                (service.clone(), running)
            })
            .collect())
    }

    async fn service_status(
        &self,
        project: &Project,
        service_name: &str,
        _system_config: &SystemConfig,
    ) -> Result<bool> {
        require_service(project, service_name)?;
        let name = self.container_name(project, service_name);
        Ok(self.lock()?.containers.get(&name).is_some_and(|c| c.state.is_running()))
    }

    fn container_name_for(&self, project: &Project, service_name: &str) -> String {
        self.container_name(project, service_name)
    }

    async fn address_for(
        &self,
        project: &Project,
        service_name: &str,
    ) -> Result<Option<(String, u16)>> {
        let name = self.container_name(project, service_name);
        Ok(self
            .lock()?
            .containers
            .get(&name)
            .filter(|c| c.state.is_running())
            .and_then(|c| c.host_port)
            .map(|port| ("127.0.0.1".to_string(), port)))
    }

    async fn cmd(
        &self,
        project: &Project,
        command_name: &str,
        arguments: &[String],
        _unimportant_paths_unsynced: bool,
    ) -> Result<i64> {
        let command = require_normal_command(project, command_name)?;
        let container =
            naming::command_container(&self.config.name_prefix, &project.name, command_name);
        let line = command.command_line(arguments);
        self.record("cmd", container, line.clone(), false)?;
        self.exit_code_for(line.as_deref())
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
        let container = self.require_running(project, service_name)?;
        let line = command.command_line(arguments);
        self.record("cmd_in_service", container, line.clone(), false)?;
        self.exit_code_for(line.as_deref())
    }

    async fn service_fg(
        &self,
        project: &Project,
        service_name: &str,
        arguments: &[String],
        _unimportant_paths_unsynced: bool,
    ) -> Result<()> {
        let service = require_service(project, service_name)?;
        let cwd = std::env::current_dir()?;
        let foreground = service.foreground_variant(&project.src_path(), &cwd);
        let line = foreground
            .command_line(arguments)
            .unwrap_or_else(|| append_arguments("", arguments));
        let container = self.container_name(project, service_name);
        self.record("service_fg", container, Some(line), false)
    }

    async fn cmd_detached(
        &self,
        project: &Project,
        command: &Command,
        run_as_root: bool,
    ) -> Result<(i64, String)> {
        let container =
            naming::command_container(&self.config.name_prefix, &project.name, "detached");
        let line = command.command_line(&[]);
        self.record("cmd_detached", container, line.clone(), run_as_root)?;

        // printenv is modelled so environment handling can be observed
        if let Some(key) = line.as_deref().and_then(|l| l.strip_prefix("printenv ")) {
            return Ok(match command.environment.get(key.trim()) {
                Some(value) => (0, format!("{}\n", value)),
                None => (1, String::new()),
            });
        }
        Ok((self.exit_code_for(line.as_deref())?, String::new()))
    }

    async fn exec(
        &self,
        project: &Project,
        service_name: &str,
        _cols: Option<u16>,
        _lines: Option<u16>,
        root: bool,
    ) -> Result<()> {
        let container = self.require_running(project, service_name)?;
        self.record("exec", container, None, root)
    }

    async fn exec_custom(
        &self,
        project: &Project,
        service_name: &str,
        command: &str,
        _cols: Option<u16>,
        _lines: Option<u16>,
        root: bool,
    ) -> Result<()> {
        let container = self.require_running(project, service_name)?;
        self.record("exec_custom", container, Some(command.to_string()), root)
    }

    async fn pull_images(
        &self,
        project: &Project,
        line_reset: &str,
        update_func: UpdateFn<'_>,
    ) -> Result<()> {
        for (label, image) in project.images() {
            update_func(&format!("Pulling {} ({})...", image, label));
            let missing = self.lock()?.missing_images.contains(&image);
            if missing {
                warn!("Image {} not found", image);
                update_func(&format!(
                    "{}Warning: image {} ({}) not found, skipped\n",
                    line_reset, image, label
                ));
            } else {
                update_func(&format!("{}Pulled {} ({})\n", line_reset, image, label));
            }
        }
        Ok(())
    }

    fn performance_value_for_auto(&self, key: &str, platform: Platform) -> bool {
        default_performance_for_auto(key, platform)
    }
}
