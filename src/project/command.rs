//! Command descriptions.

use super::service::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Runs in its own container on the project network
    Normal,
    /// Runs inside the container of an already-running service
    InService,
}

/// A short-lived process definition.
///
/// Ad-hoc commands passed to `cmd_detached` use the same type without being
/// registered in the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Image reference; required for normal commands
    #[serde(default)]
    pub image: Option<String>,
    /// Command line run through a shell; the image default when absent
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Role of the service whose container runs this command
    #[serde(default)]
    pub in_service_with_role: Option<Role>,
}

impl Command {
    /// Create a normal command running `command` in `image`.
    pub fn new(image: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            command: Some(command.into()),
            environment: BTreeMap::new(),
            in_service_with_role: None,
        }
    }

    /// Create an in-service command for the service with `role`.
    pub fn in_service(role: Role, command: impl Into<String>) -> Self {
        Self {
            image: None,
            command: Some(command.into()),
            environment: BTreeMap::new(),
            in_service_with_role: Some(role),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> CommandKind {
        if self.in_service_with_role.is_some() {
            CommandKind::InService
        } else {
            CommandKind::Normal
        }
    }

    /// Full command line with `arguments` shell-quoted and appended.
    pub fn command_line(&self, arguments: &[String]) -> Option<String> {
        self.command
            .as_deref()
            .map(|base| append_arguments(base, arguments))
    }
}

/// `base` followed by every argument, shell-quoted where needed.
pub(crate) fn append_arguments(base: &str, arguments: &[String]) -> String {
    if arguments.is_empty() {
        return base.to_string();
    }
    let quoted: Vec<String> = arguments
        .iter()
        .map(|a| shell_escape::escape(a.as_str().into()).into_owned())
        .collect();
    if base.is_empty() {
        return quoted.join(" ");
    }
    format!("{} {}", base, quoted.join(" "))
}
