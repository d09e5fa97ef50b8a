//! Progressive result reporting for multi-target operations.
//!
//! Starting or stopping several services runs one task per service. Each task
//! reports zero or more progress steps followed by exactly one terminal step
//! through a [`ResultSender`]. The caller consumes a [`MultiResultQueue`] as a
//! [`Stream`]: results arrive as they are produced, and the stream ends once
//! every requested target has reported a terminal result.
//!
//! "No result yet" and "done" are distinct: the stream is pending in the first
//! case and yields `None` only in the second. If every sender is dropped while
//! targets are still pending, the queue yields a failed terminal result for
//! each of them before ending, so no target's outcome is lost.

use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// An item that belongs to one target of a multi-target operation.
pub trait ResultItem: Send + Unpin + 'static {
    /// Name of the service or command the item belongs to.
    fn target(&self) -> &str;

    /// Whether this is the final item for its target.
    fn is_terminal(&self) -> bool;

    /// Terminal failure item, used when a target never reported.
    fn failed(target: &str, message: String) -> Self;
}

/// Outcome class of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Intermediate progress; more steps follow for this target
    Progress,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

/// One progress or outcome record of a start/stop operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStopResultStep {
    /// Service or command the step belongs to
    pub target: String,
    pub status: StepStatus,
    /// 1-based step counter within the target's operation
    pub step: u32,
    /// Total number of steps, if known
    pub steps: Option<u32>,
    /// Human-readable description
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StartStopResultStep {
    pub fn progress(
        target: impl Into<String>,
        step: u32,
        steps: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            status: StepStatus::Progress,
            step,
            steps,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: StepStatus::Succeeded,
            step: 0,
            steps: None,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: StepStatus::Failed,
            step: 0,
            steps: None,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

impl ResultItem for StartStopResultStep {
    fn target(&self) -> &str {
        &self.target
    }

    fn is_terminal(&self) -> bool {
        self.status != StepStatus::Progress
    }

    fn failed(target: &str, message: String) -> Self {
        Self::failure(target, message)
    }
}

impl std::fmt::Display for StartStopResultStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.as_deref().unwrap_or("");
        match (self.status, self.steps) {
            (StepStatus::Progress, Some(steps)) => {
                write!(f, "[{}] {}/{} {}", self.target, self.step, steps, message)
            }
            (StepStatus::Progress, None) => write!(f, "[{}] {}", self.target, message),
            (StepStatus::Succeeded, _) => write!(f, "[{}] done: {}", self.target, message),
            (StepStatus::Failed, _) => write!(f, "[{}] failed: {}", self.target, message),
        }
    }
}

/// Producer handle of a [`MultiResultQueue`]. Cheap to clone, one per task.
#[derive(Debug)]
pub struct ResultSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ResultSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: ResultItem> ResultSender<T> {
    /// Emit an item. Items sent after the consumer went away are discarded.
    pub fn send(&self, item: T) {
        if self.tx.send(item).is_err() {
            debug!("Result queue consumer is gone, discarding result");
        }
    }
}

/// Consumer side of a multi-target operation's results.
///
/// Finite and non-restartable: once it yielded `None` it keeps doing so.
#[derive(Debug)]
pub struct MultiResultQueue<T> {
    rx: mpsc::UnboundedReceiver<T>,
    pending: BTreeSet<String>,
    synthesized: VecDeque<T>,
}

impl<T: ResultItem> MultiResultQueue<T> {
    /// Create a queue expecting one terminal result for each of `targets`.
    pub fn channel<I, S>(targets: I) -> (ResultSender<T>, Self)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            rx,
            pending: targets.into_iter().map(Into::into).collect(),
            synthesized: VecDeque::new(),
        };
        (ResultSender { tx }, queue)
    }

    /// Create a queue in which every target already failed with `message`.
    pub fn failed_all<I, S>(targets: I, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, queue) = Self::channel(targets);
        for target in &queue.pending {
            sender.send(T::failed(target, message.to_string()));
        }
        queue
    }

    /// Targets that have not reported a terminal result yet.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Whether every target has reported its terminal result.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.synthesized.is_empty()
    }

    /// Drain the queue, keeping only terminal results.
    pub async fn terminal_results(self) -> Vec<T> {
        use futures::StreamExt;
        self.filter(|item| futures::future::ready(item.is_terminal()))
            .collect()
            .await
    }
}

impl<T: ResultItem> Stream for MultiResultQueue<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.synthesized.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.pending.is_empty() {
                this.rx.close();
                return Poll::Ready(None);
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(item)) => {
                    if !this.pending.contains(item.target()) {
                        warn!(
                            "Discarding result for '{}': already terminal or unknown target",
                            item.target()
                        );
                        continue;
                    }
                    if item.is_terminal() {
                        this.pending.remove(item.target());
                    }
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    for target in std::mem::take(&mut this.pending) {
                        warn!("No result reported for '{}'", target);
                        this.synthesized.push_back(T::failed(
                            &target,
                            "operation ended without reporting a result".to_string(),
                        ));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_closes_after_all_terminal() {
        let (tx, queue) = MultiResultQueue::channel(["a", "b"]);
        tx.send(StartStopResultStep::progress("a", 1, Some(2), "pulling"));
        tx.send(StartStopResultStep::succeeded("b", "started"));
        tx.send(StartStopResultStep::succeeded("a", "started"));

        // sender still alive: the stream must end on terminal results alone
        let items: Vec<_> = queue.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].status, StepStatus::Progress);
        assert!(items[1..].iter().all(StartStopResultStep::is_success));
        drop(tx);
    }

    #[tokio::test]
    async fn test_empty_target_list_is_done() {
        let (_tx, mut queue) =
            MultiResultQueue::<StartStopResultStep>::channel(Vec::<String>::new());
        assert!(queue.is_finished());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sender_synthesizes_failures() {
        let (tx, queue) = MultiResultQueue::channel(["a", "b", "c"]);
        tx.send(StartStopResultStep::succeeded("b", "ok"));
        drop(tx);

        let results = queue.terminal_results().await;
        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.target.as_str())
            .collect();
        assert_eq!(failed, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_results_after_terminal_are_discarded() {
        let (tx, queue) = MultiResultQueue::channel(["a", "b"]);
        tx.send(StartStopResultStep::succeeded("a", "ok"));
        tx.send(StartStopResultStep::failure("a", "late duplicate"));
        tx.send(StartStopResultStep::succeeded("unknown", "ok"));
        tx.send(StartStopResultStep::succeeded("b", "ok"));

        let results: Vec<_> = queue.collect().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(StartStopResultStep::is_success));
    }

    #[tokio::test]
    async fn test_results_are_observed_before_completion() {
        let (tx, mut queue) = MultiResultQueue::channel(["fast", "slow"]);
        let slow = tx.clone();
        tokio::spawn(async move {
            tx.send(StartStopResultStep::succeeded("fast", "ok"));
        });
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow.send(StartStopResultStep::succeeded("slow", "ok"));
        });

        let first = queue.next().await.unwrap();
        assert_eq!(first.target, "fast");
        assert!(!queue.is_finished());

        let second = queue.next().await.unwrap();
        assert_eq!(second.target, "slow");
        assert!(queue.next().await.is_none());
        assert!(queue.next().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_all() {
        let queue =
            MultiResultQueue::<StartStopResultStep>::failed_all(["x", "y"], "daemon unreachable");
        let results = queue.terminal_results().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_failure()
            && r.message.as_deref() == Some("daemon unreachable")));
    }

    #[test]
    fn test_display() {
        let step = StartStopResultStep::progress("web", 2, Some(4), "creating container");
        assert_eq!(step.to_string(), "[web] 2/4 creating container");
        let step = StartStopResultStep::failure("web", "boom");
        assert_eq!(step.to_string(), "[web] failed: boom");
    }
}
