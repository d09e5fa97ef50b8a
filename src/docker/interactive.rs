//! Attached container execution.
//!
//! Forwards the caller's stdin to the container and the container's output to
//! the caller's stdout/stderr until the process ends, then reports its exit
//! code. A TTY is requested when stdin is a terminal; the host terminal is
//! in raw mode for the length of the session.

use super::client::ContainerClient;
use super::executor::ExecConfig;
use crate::engine::{EngineError, Result};
use bollard::container::LogOutput;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use bollard::exec::StartExecResults;
use futures::stream::{Stream, StreamExt};
use std::io::IsTerminal;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_LINES: u16 = 24;

/// Whether attached sessions get a TTY.
pub fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

/// Terminal size to request; `None` if neither dimension was given.
fn terminal_size(cols: Option<u16>, lines: Option<u16>) -> Option<(u16, u16)> {
    match (cols, lines) {
        (None, None) => None,
        (cols, lines) => Some((cols.unwrap_or(DEFAULT_COLS), lines.unwrap_or(DEFAULT_LINES))),
    }
}

/// Size of the caller's terminal, unless overridden by `cols` / `lines`.
fn session_size(cols: Option<u16>, lines: Option<u16>) -> Option<(u16, u16)> {
    terminal_size(cols, lines).or_else(|| crossterm::terminal::size().ok())
}

/// Keeps the host terminal in raw mode until dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable(tty: bool) -> Option<Self> {
        if !tty {
            return None;
        }
        match enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                warn!("Failed to enable raw mode: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to disable raw mode: {}", e);
        }
    }
}

fn forward_stdin(mut input: Pin<Box<dyn AsyncWrite + Send>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buffer = vec![0u8; 1024];
        loop {
            match stdin.read(&mut buffer).await {
                Ok(0) => {
                    let _ = input.shutdown().await;
                    break;
                }
                Ok(n) => {
                    if let Err(e) = input.write_all(&buffer[..n]).await {
                        warn!("Failed to write to container stdin: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from host stdin: {}", e);
                    break;
                }
            }
        }
    })
}

async fn forward_output<S>(mut output: S) -> Result<()>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    while let Some(log) = output.next().await {
        let log = log?;
        let result = match log {
            LogOutput::StdErr { message } => {
                stderr.write_all(&message).await.and(stderr.flush().await)
            }
            other => {
                let bytes = other.into_bytes();
                stdout.write_all(&bytes).await.and(stdout.flush().await)
            }
        };
        if let Err(e) = result {
            warn!("Failed to write container output: {}", e);
            break;
        }
    }
    Ok(())
}

/// Run an exec in a running container attached to the caller's streams.
pub async fn exec_attached(
    client: &ContainerClient,
    container: &str,
    config: &ExecConfig,
    cols: Option<u16>,
    lines: Option<u16>,
) -> Result<i64> {
    let docker = client.docker();
    let tty = stdin_is_terminal();
    debug!("Attached exec in {}: {:?} (tty: {})", container, config.cmd(), tty);

    let exec = docker.create_exec(container, config.create_options(true, tty)).await?;
    let started = docker.start_exec(&exec.id, None).await?;

    if tty && let Some((width, height)) = session_size(cols, lines) {
        if let Err(e) = docker
            .resize_exec(&exec.id, bollard::exec::ResizeExecOptions { height, width })
            .await
        {
            warn!("Failed to resize exec TTY: {}", e);
        }
    }

    match started {
        StartExecResults::Attached { output, input } => {
            let raw_mode = RawModeGuard::enable(tty);
            let stdin_task = forward_stdin(input);
            let result = forward_output(output).await;
            stdin_task.abort();
            drop(raw_mode);
            result?;
        }
        StartExecResults::Detached => {
            return Err(EngineError::Backend("Unexpected detached execution".to_string()));
        }
    }

    let exit_code = docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
    debug!("Attached exec in {} exited with {}", container, exit_code);
    Ok(exit_code)
}

/// Start a created container attached to the caller's streams and wait for
/// it to exit.
pub async fn run_attached(
    client: &ContainerClient,
    container: &str,
    tty: bool,
    cols: Option<u16>,
    lines: Option<u16>,
) -> Result<i64> {
    let docker = client.docker();
    let options = bollard::container::AttachContainerOptions::<String> {
        stdin: Some(true),
        stdout: Some(true),
        stderr: Some(true),
        stream: Some(true),
        logs: Some(true),
        ..Default::default()
    };

    // attach before starting so no early output is lost
    let bollard::container::AttachContainerResults { output, input } =
        docker.attach_container(container, Some(options)).await?;
    client.start_container(container).await?;

    if tty && let Some((width, height)) = session_size(cols, lines) {
        if let Err(e) = docker
            .resize_container_tty(
                container,
                bollard::container::ResizeContainerTtyOptions { height, width },
            )
            .await
        {
            warn!("Failed to resize container TTY: {}", e);
        }
    }

    let raw_mode = RawModeGuard::enable(tty);
    let stdin_task = forward_stdin(input);
    let result = forward_output(output).await;
    stdin_task.abort();
    drop(raw_mode);
    result?;

    client.wait_container(container).await
}
