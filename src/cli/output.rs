//! Plain-text rendering of engine results.

use crate::results::{StartStopResultStep, StepStatus};
use std::collections::BTreeMap;

/// One line describing a start/stop step.
pub fn format_step(step: &StartStopResultStep) -> String {
    let message = step.message.as_deref().unwrap_or("");
    match step.status {
        StepStatus::Progress => match step.steps {
            Some(total) => format!("[{}/{}] {}: {}", step.step, total, step.target, message),
            None => format!("[{}] {}: {}", step.step, step.target, message),
        },
        StepStatus::Succeeded => format!("{}: {}", step.target, message),
        StepStatus::Failed => format!("{}: FAILED: {}", step.target, message),
    }
}

/// Service state table, one service per line, names aligned.
pub fn format_status(status: &BTreeMap<String, bool>) -> String {
    let width = status.keys().map(String::len).max().unwrap_or(0);
    status
        .iter()
        .map(|(name, running)| {
            let state = if *running { "running" } else { "stopped" };
            format!("{:<width$}  {}", name, state, width = width)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
