//! Live progress for running transfer tasks.
//!
//! Workers emit through a [`ProgressSink`], which never blocks. The default
//! sink forwards over an unbounded channel to a reporter task that turns the
//! stream into throttled log lines. Progress is NOT persisted.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::logging::LogThrottle;

/// Progress of one task attempt. `completed` never decreases within an
/// attempt; a restart begins a new attempt from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub task: String,
    pub attempt: u32,
    /// Unknown until the remote listing arrives.
    pub total: Option<usize>,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    Progress(ProgressEvent),
    /// The task ended before retrieving everything it listed.
    Stopped { task: String, reason: String },
}

/// Consumer of worker progress. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, event: ProgressEvent);
    fn stopped(&self, task: &str, reason: &str);
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink for ChannelSink {
    fn progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(ProgressUpdate::Progress(event));
    }

    fn stopped(&self, task: &str, reason: &str) {
        let _ = self.tx.send(ProgressUpdate::Stopped {
            task: task.to_string(),
            reason: reason.to_string(),
        });
    }
}

pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<ProgressUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

/// Log updates from `rx` until every sender is gone. Per-file lines are
/// throttled; the last file of a listing and early stops always show.
/// Resolves to the number of updates seen.
pub fn spawn_reporter(mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut throttle = LogThrottle::new(Duration::from_millis(500));
        let mut seen = 0usize;
        while let Some(update) = rx.recv().await {
            seen += 1;
            match update {
                ProgressUpdate::Progress(ev) => {
                    let done = ev.total == Some(ev.completed);
                    if done || throttle.should_log() {
                        info!(
                            task = %ev.task,
                            attempt = ev.attempt,
                            completed = ev.completed,
                            total = ev.total.map(|t| t as i64).unwrap_or(-1),
                            "Transfer progress"
                        );
                    }
                }
                ProgressUpdate::Stopped { task, reason } => {
                    warn!(task = %task, reason = %reason, "Task stopped early");
                }
            }
        }
        seen
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(task: &str, attempt: u32, total: Option<usize>, completed: usize) -> ProgressEvent {
        ProgressEvent {
            task: task.to_string(),
            attempt,
            total,
            completed,
        }
    }

    #[tokio::test]
    async fn test_reporter_drains_until_last_sender_drops() {
        let (sink, rx) = channel();
        let reporter = spawn_reporter(rx);

        let other = sink.clone();
        sink.progress(event("R1", 1, Some(3), 0));
        other.progress(event("R2", 1, Some(2), 2));
        sink.stopped("R1", "connection lost");
        drop(sink);
        other.progress(event("R2", 2, None, 0));
        drop(other);

        let seen = tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .expect("reporter did not finish")
            .unwrap();
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn test_emitting_after_reporter_is_gone_does_not_block() {
        let (sink, rx) = channel();
        drop(rx);
        sink.progress(event("R1", 1, Some(1), 1));
        sink.stopped("R1", "interrupted");
    }
}
