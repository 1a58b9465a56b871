//! Retry decisions after a failed transfer attempt.
//!
//! Each task gets at most one silent restart for a failure with nothing
//! retrieved, and at most one restart after a connection drop mid-transfer.
//! The drop restart is automatic in headless mode and confirmed by the
//! operator otherwise.

use async_trait::async_trait;

use super::error::TransferError;

/// Diagnostic recorded for devices that fail the liveness probe.
pub const OFFLINE_REASON: &str = "offline or unreachable";

/// Longest diagnostic message kept in an outcome.
pub const MESSAGE_LIMIT: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Erase the task's local files and start over.
    RetryFromScratch,
    /// Keep what was retrieved and stop.
    AcceptPartial,
    /// Stop with the given diagnostic.
    GiveUp(String),
}

/// Restarts already spent by one task.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub zero_progress_failures: u32,
    pub drop_restarts: u32,
}

/// Asks the operator whether a dropped transfer should start over.
#[async_trait]
pub trait RetryPrompt: Send + Sync {
    async fn confirm_restart(&self, task: &str, retrieved: usize, listed: Option<usize>) -> bool;
}

/// Policy outcome before any operator interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Decided(RetryDecision),
    AskOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    headless: bool,
}

impl RetryPolicy {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }

    /// Apply the rules in order without side effects.
    pub fn evaluate(&self, budget: &RetryBudget, error: &TransferError) -> Verdict {
        match error {
            TransferError::Unreachable { .. } => {
                Verdict::Decided(RetryDecision::GiveUp(OFFLINE_REASON.to_string()))
            }
            TransferError::Interrupted { .. } => {
                if budget.drop_restarts > 0 {
                    Verdict::Decided(RetryDecision::AcceptPartial)
                } else if self.headless {
                    Verdict::Decided(RetryDecision::RetryFromScratch)
                } else {
                    Verdict::AskOperator
                }
            }
            TransferError::Connection(_) | TransferError::Cleanup { .. } => {
                if budget.zero_progress_failures == 0 {
                    Verdict::Decided(RetryDecision::RetryFromScratch)
                } else {
                    Verdict::Decided(RetryDecision::GiveUp(truncate_message(
                        &error.to_string(),
                        MESSAGE_LIMIT,
                    )))
                }
            }
        }
    }

    /// Decide what to do after `error`, asking `prompt` when needed, and
    /// charge any restart against `budget`.
    pub async fn decide(
        &self,
        budget: &mut RetryBudget,
        error: &TransferError,
        listed: Option<usize>,
        task: &str,
        prompt: &dyn RetryPrompt,
    ) -> RetryDecision {
        let decision = match self.evaluate(budget, error) {
            Verdict::Decided(decision) => decision,
            Verdict::AskOperator => {
                if prompt
                    .confirm_restart(task, error.files_retrieved(), listed)
                    .await
                {
                    RetryDecision::RetryFromScratch
                } else {
                    RetryDecision::AcceptPartial
                }
            }
        };

        if decision == RetryDecision::RetryFromScratch {
            match error {
                TransferError::Interrupted { .. } => budget.drop_restarts += 1,
                _ => budget.zero_progress_failures += 1,
            }
        }
        decision
    }
}

/// Cut `message` to at most `limit` characters.
pub fn truncate_message(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SessionError;
    use crate::ftp::FtpError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Answer {
        yes: bool,
        asked: AtomicUsize,
    }

    impl Answer {
        fn new(yes: bool) -> Self {
            Self {
                yes,
                asked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RetryPrompt for Answer {
        async fn confirm_restart(&self, _: &str, _: usize, _: Option<usize>) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.yes
        }
    }

    fn dropped(retrieved: usize) -> TransferError {
        TransferError::from_session(
            retrieved,
            SessionError::Retrieve {
                name: "PROG.TP".into(),
                source: FtpError::Disconnected,
            },
        )
    }

    fn refused() -> TransferError {
        TransferError::from_session(
            0,
            SessionError::Connect(FtpError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused by the robot controller at the far end",
            ))),
        )
    }

    #[test]
    fn unreachable_gives_up_as_offline() {
        let policy = RetryPolicy::new(true);
        let err = TransferError::Unreachable {
            address: "192.168.1.9".into(),
        };
        assert_eq!(
            policy.evaluate(&RetryBudget::default(), &err),
            Verdict::Decided(RetryDecision::GiveUp(OFFLINE_REASON.into()))
        );
    }

    #[tokio::test]
    async fn zero_progress_retries_once_then_gives_up() {
        let policy = RetryPolicy::new(false);
        let prompt = Answer::new(true);
        let mut budget = RetryBudget::default();

        let first = policy.decide(&mut budget, &refused(), None, "R1", &prompt).await;
        assert_eq!(first, RetryDecision::RetryFromScratch);

        let second = policy.decide(&mut budget, &refused(), None, "R1", &prompt).await;
        match second {
            RetryDecision::GiveUp(msg) => {
                assert!(msg.starts_with("connect failed"));
                assert_eq!(msg.chars().count(), MESSAGE_LIMIT);
            }
            other => panic!("expected GiveUp, got {:?}", other),
        }
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn headless_drop_restarts_once_without_asking() {
        let policy = RetryPolicy::new(true);
        let prompt = Answer::new(false);
        let mut budget = RetryBudget::default();

        let first = policy.decide(&mut budget, &dropped(3), Some(10), "R2", &prompt).await;
        assert_eq!(first, RetryDecision::RetryFromScratch);
        let second = policy.decide(&mut budget, &dropped(5), Some(10), "R2", &prompt).await;
        assert_eq!(second, RetryDecision::AcceptPartial);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interactive_drop_follows_the_operator() {
        let policy = RetryPolicy::new(false);

        let yes = Answer::new(true);
        let mut budget = RetryBudget::default();
        let decision = policy.decide(&mut budget, &dropped(1), Some(4), "R3", &yes).await;
        assert_eq!(decision, RetryDecision::RetryFromScratch);
        // A second drop is not asked about again.
        let decision = policy.decide(&mut budget, &dropped(2), Some(4), "R3", &yes).await;
        assert_eq!(decision, RetryDecision::AcceptPartial);
        assert_eq!(yes.asked.load(Ordering::SeqCst), 1);

        let no = Answer::new(false);
        let mut budget = RetryBudget::default();
        let decision = policy.decide(&mut budget, &dropped(1), Some(4), "R3", &no).await;
        assert_eq!(decision, RetryDecision::AcceptPartial);
        assert_eq!(budget, RetryBudget::default());
    }

    #[tokio::test]
    async fn drop_and_zero_progress_budgets_are_independent() {
        let policy = RetryPolicy::new(true);
        let prompt = Answer::new(true);
        let mut budget = RetryBudget::default();

        assert_eq!(
            policy.decide(&mut budget, &dropped(2), Some(5), "R4", &prompt).await,
            RetryDecision::RetryFromScratch
        );
        assert_eq!(
            policy.decide(&mut budget, &refused(), None, "R4", &prompt).await,
            RetryDecision::RetryFromScratch
        );
        assert!(matches!(
            policy.decide(&mut budget, &refused(), None, "R4", &prompt).await,
            RetryDecision::GiveUp(_)
        ));
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_message("short", 60), "short");
        assert_eq!(truncate_message("ääääää", 3), "äää");
        assert_eq!(truncate_message(&"x".repeat(80), 60).len(), 60);
    }
}
