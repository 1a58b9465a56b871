use std::io::{Write, stdin, stdout};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::RetryPrompt;

/// Asks the operator on the terminal whether a dropped transfer should be
/// restarted. Concurrent workers take turns; only one question is on
/// screen at a time.
#[derive(Default)]
pub struct TerminalPrompt {
    turn: Mutex<()>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryPrompt for TerminalPrompt {
    async fn confirm_restart(&self, task: &str, retrieved: usize, listed: Option<usize>) -> bool {
        let _turn = self.turn.lock().await;
        let question = match listed {
            Some(total) => format!(
                "{task} lost connection after {retrieved} of {total} files. Retry from scratch? [y/N] "
            ),
            None => format!(
                "{task} lost connection after {retrieved} files. Retry from scratch? [y/N] "
            ),
        };

        match tokio::task::spawn_blocking(move || ask(&question)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(task, error = %e, "Could not read answer, keeping partial backup");
                false
            }
            Err(e) => {
                warn!(task, error = %e, "Prompt task failed, keeping partial backup");
                false
            }
        }
    }
}

fn ask(question: &str) -> std::io::Result<bool> {
    print!("{question}");
    stdout().flush()?;

    let mut input = String::new();
    stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    let answer = input.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
