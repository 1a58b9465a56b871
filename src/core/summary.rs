use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

use super::models::{Outcome, OutcomeStatus};

/// All outcomes of one backup run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub destination_root: PathBuf,
    pub outcomes: Vec<Outcome>,
    /// Whether the destination root was deleted because nothing succeeded.
    pub root_discarded: bool,
}

impl RunSummary {
    pub fn new(destination_root: PathBuf, outcomes: Vec<Outcome>) -> Self {
        Self {
            destination_root,
            outcomes,
            root_discarded: false,
        }
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.iter().any(Outcome::is_success)
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Outcomes ordered by device label (R2 before R10).
    pub fn sorted(&self) -> Vec<&Outcome> {
        let mut sorted: Vec<&Outcome> = self.outcomes.iter().collect();
        sorted.sort_by_key(|o| device_sort_key(&o.device));
        sorted
    }

    /// Human-readable report, one line per device.
    pub fn render(&self) -> String {
        let mut out = String::from("Backup Summary:\n----------------\n");
        for o in self.sorted() {
            let _ = write!(out, "{} - {}", o.device, o.status);
            match (o.status, o.files_listed) {
                (OutcomeStatus::Success, _) => {
                    let _ = write!(out, " ({} files)", o.files_retrieved);
                }
                (OutcomeStatus::Partial, Some(listed)) => {
                    let _ = write!(out, " ({} of {} files)", o.files_retrieved, listed);
                }
                _ => {}
            }
            if let Some(msg) = &o.message {
                let _ = write!(out, ": {}", msg);
            }
            out.push('\n');
        }
        if self.all_failed() {
            out.push_str("\nNo robot was backed up successfully.\n");
        }
        out
    }
}

fn device_sort_key(label: &str) -> (u64, String) {
    let number = label
        .trim_start_matches('R')
        .parse::<u64>()
        .unwrap_or(u64::MAX);
    (number, label.to_string())
}

/// Append one line per failed outcome to the diagnostic log. Problems
/// writing the log are reported and otherwise ignored.
pub fn append_error_log(path: &Path, outcomes: &[Outcome]) {
    let failed: Vec<&Outcome> = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .collect();
    if failed.is_empty() {
        return;
    }

    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut lines = String::new();
    for o in failed {
        let _ = writeln!(
            lines,
            "[{}] {} ({}): {}",
            stamp,
            o.device,
            o.address,
            o.message.as_deref().unwrap_or("failed")
        );
    }

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(lines.as_bytes()));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to write error log");
    }
}
