//! Resource naming shared by the engine backends.
//!
//! Names are built from dash-joined parts. Dashes inside a part are doubled,
//! and valid project, service and command names never start with a dash, so
//! distinct inputs never map to the same name.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn invalid_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("valid regex"))
}

fn escape(part: &str) -> String {
    invalid_chars().replace_all(part, "_").replace('-', "--")
}

fn join(parts: &[&str]) -> String {
    parts.iter().map(|p| escape(p)).collect::<Vec<_>>().join("-")
}

/// Container of a project service.
pub fn service_container(prefix: &str, project: &str, service: &str) -> String {
    join(&[prefix, project, service])
}

/// One-off container of a command run; unique per call.
pub fn command_container(prefix: &str, project: &str, command: &str) -> String {
    let run_id = Uuid::new_v4().simple().to_string();
    format!("{}.{}", join(&[prefix, project, "cmd", command]), &run_id[..12])
}

/// Privileged helper container; unique per call.
pub fn helper_container(prefix: &str) -> String {
    let run_id = Uuid::new_v4().simple().to_string();
    format!("{}.{}", join(&[prefix, "helper"]), &run_id[..12])
}

/// Network shared by every container of a project.
///
/// The `--net` suffix decodes to a two-part name, so no container name
/// (three or more parts) can equal it.
pub fn project_network(prefix: &str, project: &str) -> String {
    format!("{}--net", join(&[prefix, project]))
}
