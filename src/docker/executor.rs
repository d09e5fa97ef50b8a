//! Captured command execution in running containers.

use crate::engine::{EngineError, Result};
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::stream::StreamExt;
use tracing::debug;

/// Execution configuration builder.
#[derive(Debug, Default)]
pub struct ExecConfigBuilder {
    cmd: Vec<String>,
    env: Vec<String>,
    working_dir: Option<String>,
    user: Option<String>,
}

impl ExecConfigBuilder {
    /// Set the command to execute.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the user to execute as.
    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn build(self) -> ExecConfig {
        ExecConfig {
            cmd: self.cmd,
            env: self.env,
            working_dir: self.working_dir,
            user: self.user,
        }
    }
}

/// Configuration of one captured exec.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    cmd: Vec<String>,
    env: Vec<String>,
    working_dir: Option<String>,
    user: Option<String>,
}

impl ExecConfig {
    pub fn builder() -> ExecConfigBuilder {
        ExecConfigBuilder::default()
    }

    /// Run `command` through the container shell.
    pub fn shell(command: &str) -> ExecConfigBuilder {
        Self::builder().cmd([crate::env::container::SHELL, "-c", command])
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub(crate) fn create_options(
        &self,
        attach_stdin: bool,
        tty: bool,
    ) -> CreateExecOptions<String> {
        CreateExecOptions {
            cmd: Some(self.cmd.clone()),
            env: (!self.env.is_empty()).then(|| self.env.clone()),
            working_dir: self.working_dir.clone(),
            user: self.user.clone(),
            attach_stdin: Some(attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(tty),
            ..Default::default()
        }
    }
}

/// Output from command execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if not available)
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get combined output (stdout + stderr).
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Execute a command in a running container and capture its output.
pub async fn execute(docker: &Docker, container: &str, config: &ExecConfig) -> Result<ExecOutput> {
    debug!("Executing command in container {}: {:?}", container, config.cmd);

    let exec = docker.create_exec(container, config.create_options(false, false)).await?;
    let start_results = docker.start_exec(&exec.id, None).await?;

    let mut stdout = String::new();
    let mut stderr = String::new();

    match start_results {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(result) = output.next().await {
                let log = result
                    .map_err(|e| EngineError::Backend(format!("Failed to read output: {}", e)))?;
                let text = log.to_string();
                match log {
                    bollard::container::LogOutput::StdErr { .. } => stderr.push_str(&text),
                    _ => stdout.push_str(&text),
                }
            }
        }
        StartExecResults::Detached => {
            return Err(EngineError::Backend("Unexpected detached execution".to_string()));
        }
    }

    let exit_code = docker.inspect_exec(&exec.id).await?.exit_code;
    debug!("Command executed with exit code: {:?}", exit_code);

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}
