//! Drives one transfer task from probe to terminal outcome.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::error::TransferError;
use super::models::{Outcome, TransferTask};
use super::prober::LivenessProbe;
use super::progress::{ProgressEvent, ProgressSink};
use super::retry::{
    MESSAGE_LIMIT, OFFLINE_REASON, RetryBudget, RetryDecision, RetryPolicy, RetryPrompt, Verdict,
    truncate_message,
};
use super::session::{DeviceSession, SessionObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    ProbingLiveness,
    Connecting,
    Transferring,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed | Self::Failed)
    }

    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (NotStarted, ProbingLiveness)
                | (ProbingLiveness, Connecting)
                | (Connecting, Transferring)
                | (Connecting, Connecting)
                | (Transferring, Connecting)
                | (Transferring, Succeeded)
                | (Transferring, PartiallyFailed)
                | (_, Failed)
        )
    }
}

fn advance(state: &mut WorkerState, next: WorkerState) {
    if !state.can_transition_to(next) {
        error!(from = ?state, to = ?next, "invalid worker state transition");
        debug_assert!(false, "invalid transition {:?} -> {:?}", state, next);
    }
    debug!(from = ?state, to = ?next, "state");
    *state = next;
}

/// Everything a worker needs besides its task; shared by all workers of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub session: Arc<DeviceSession>,
    pub prober: Arc<dyn LivenessProbe>,
    pub policy: RetryPolicy,
    pub prompt: Arc<dyn RetryPrompt>,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct TransferWorker {
    task: TransferTask,
    ctx: WorkerContext,
    state: WorkerState,
}

impl TransferWorker {
    pub fn new(task: TransferTask, ctx: WorkerContext) -> Self {
        Self {
            task,
            ctx,
            state: WorkerState::NotStarted,
        }
    }

    /// Run to a terminal outcome. Exactly one outcome is returned, also when
    /// `cancel` fires mid-transfer (files already on disk are left alone).
    pub async fn run(mut self, cancel: CancellationToken) -> Outcome {
        let span = info_span!(
            "transfer",
            device = %self.task.id,
            address = %self.task.device.address
        );
        let task_id = self.task.id.clone();
        let address = self.task.device.address.clone();
        let progress = Arc::clone(&self.ctx.progress);

        async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Transfer interrupted");
                    progress.stopped(&task_id, "interrupted");
                    Outcome::failed(&task_id, &address, None, "interrupted")
                }
                outcome = self.drive() => outcome,
            };
            info!(
                status = %outcome.status,
                files = outcome.files_retrieved,
                message = outcome.message.as_deref().unwrap_or(""),
                "Transfer finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Outcome {
        advance(&mut self.state, WorkerState::ProbingLiveness);
        if !self.ctx.prober.probe(&self.task.device.address).await {
            let error = TransferError::Unreachable {
                address: self.task.device.address.clone(),
            };
            let reason = match self.ctx.policy.evaluate(&RetryBudget::default(), &error) {
                Verdict::Decided(RetryDecision::GiveUp(reason)) => reason,
                _ => OFFLINE_REASON.to_string(),
            };
            return self.give_up(None, reason).await;
        }

        let mut budget = RetryBudget::default();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            advance(&mut self.state, WorkerState::Connecting);

            let report = {
                let mut observer = AttemptObserver {
                    state: &mut self.state,
                    sink: self.ctx.progress.as_ref(),
                    task: &self.task.id,
                    attempt,
                    total: None,
                };
                self.ctx
                    .session
                    .run(
                        &self.task.device,
                        self.task.category,
                        &self.task.destination,
                        &mut observer,
                    )
                    .await
            };

            let Some(session_error) = report.error else {
                advance(&mut self.state, WorkerState::Succeeded);
                return Outcome::success(&self.task, report.files_retrieved);
            };

            let error = TransferError::from_session(report.files_retrieved, session_error);
            warn!(attempt, retrieved = report.files_retrieved, error = %error, "Attempt failed");

            let decision = self
                .ctx
                .policy
                .decide(
                    &mut budget,
                    &error,
                    report.files_listed,
                    &self.task.id,
                    self.ctx.prompt.as_ref(),
                )
                .await;

            match decision {
                RetryDecision::RetryFromScratch => {
                    info!(attempt, "Restarting transfer from scratch");
                    discard(&self.task.destination).await;
                }
                RetryDecision::AcceptPartial => {
                    let message = truncate_message(&error.to_string(), MESSAGE_LIMIT);
                    self.ctx.progress.stopped(&self.task.id, &message);
                    advance(&mut self.state, WorkerState::PartiallyFailed);
                    return Outcome::partial(
                        &self.task,
                        report.files_retrieved,
                        report.files_listed,
                        message,
                    );
                }
                RetryDecision::GiveUp(reason) => {
                    return self.give_up(report.files_listed, reason).await;
                }
            }
        }
    }

    async fn give_up(&mut self, listed: Option<usize>, reason: String) -> Outcome {
        discard(&self.task.destination).await;
        self.ctx.progress.stopped(&self.task.id, &reason);
        advance(&mut self.state, WorkerState::Failed);
        Outcome::failed(&self.task.id, &self.task.device.address, listed, reason)
    }
}

/// Best-effort removal of a task's destination subdirectory.
async fn discard(destination: &Path) {
    match tokio::fs::remove_dir_all(destination).await {
        Ok(()) => debug!(path = %destination.display(), "removed task directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            let error = TransferError::Cleanup {
                path: destination.to_path_buf(),
                source,
            };
            warn!(error = %error, "Cleanup failed");
        }
    }
}

struct AttemptObserver<'a> {
    state: &'a mut WorkerState,
    sink: &'a dyn ProgressSink,
    task: &'a str,
    attempt: u32,
    total: Option<usize>,
}

impl AttemptObserver<'_> {
    fn emit(&self, completed: usize) {
        self.sink.progress(ProgressEvent {
            task: self.task.to_string(),
            attempt: self.attempt,
            total: self.total,
            completed,
        });
    }
}

impl SessionObserver for AttemptObserver<'_> {
    fn listed(&mut self, total: usize) {
        advance(self.state, WorkerState::Transferring);
        self.total = Some(total);
        self.emit(0);
    }

    fn retrieved(&mut self, _name: &str, completed: usize) {
        self.emit(completed);
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerState::*;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Succeeded, PartiallyFailed, Failed] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Connecting));
            assert!(!terminal.can_transition_to(Failed));
        }
    }

    #[test]
    fn retry_loops_back_to_connecting() {
        assert!(Connecting.can_transition_to(Connecting));
        assert!(Transferring.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(Succeeded));
        assert!(!NotStarted.can_transition_to(Connecting));
        assert!(ProbingLiveness.can_transition_to(Failed));
    }
}
