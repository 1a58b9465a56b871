use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::error::RunError;
use super::models::{BackupJob, Outcome, OutcomeStatus, TransferTask};
use super::prober::{LivenessProbe, PingProbe};
use super::progress::{self, ProgressSink};
use super::retry::{RetryPolicy, RetryPrompt};
use super::session::{Connector, DeviceSession};
use super::summary::{RunSummary, append_error_log};
use super::worker::{TransferWorker, WorkerContext};
use crate::context::AppContext;
use crate::ftp::FtpConnector;

/// Local time format used in destination root names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M";

/// Runs one backup job: every device of the job is transferred
/// concurrently into its own subdirectory of a fresh destination root.
pub struct Orchestrator {
    ctx: AppContext,
    prober: Arc<dyn LivenessProbe>,
    connector: Arc<dyn Connector>,
    prompt: Arc<dyn RetryPrompt>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// `prompt` answers restart questions in interactive mode; it is never
    /// consulted when the run is headless.
    pub fn new(ctx: AppContext, prompt: Arc<dyn RetryPrompt>) -> Self {
        let prober = Arc::new(PingProbe::new(ctx.config.probe_timeout()));
        Self {
            ctx,
            prober,
            connector: Arc::new(FtpConnector::default()),
            prompt,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn LivenessProbe>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Tie the run to an externally owned token, e.g. the Ctrl-C handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Back up every device of `job`. Returns once every device has a
    /// terminal outcome; only failing to create the destination root
    /// aborts the run itself.
    pub async fn run(&self, job_id: &str, job: &BackupJob) -> Result<RunSummary, RunError> {
        let run_id = Uuid::now_v7();
        let span = info_span!("backup", job = %job_id, run = %run_id);
        self.run_inner(job_id, job).instrument(span).await
    }

    async fn run_inner(&self, job_id: &str, job: &BackupJob) -> Result<RunSummary, RunError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let root = create_destination_root(job.folder(), job_id, &timestamp)?;
        info!(
            root = %root.display(),
            devices = job.devices().len(),
            category = %job.category(),
            headless = self.ctx.config.headless,
            "Starting backup"
        );

        let (sink, rx) = progress::channel();
        let reporter = progress::spawn_reporter(rx);
        let sink: Arc<dyn ProgressSink> = Arc::new(sink);

        let worker_ctx = WorkerContext {
            session: Arc::new(DeviceSession::new(
                Arc::clone(&self.connector),
                self.ctx.config.connect_timeout(),
            )),
            prober: Arc::clone(&self.prober),
            policy: RetryPolicy::new(self.ctx.config.headless),
            prompt: Arc::clone(&self.prompt),
            progress: sink,
        };

        let mut handles = Vec::with_capacity(job.devices().len());
        for device in job.devices() {
            let task = TransferTask::new(device.clone(), job.category(), &root);
            let label = task.id.clone();
            let address = task.device.address.clone();
            let worker = TransferWorker::new(task, worker_ctx.clone());
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(worker.run(cancel).in_current_span());
            handles.push((label, address, handle));
        }
        // Workers hold the remaining senders; the reporter ends with the last one.
        drop(worker_ctx);

        let mut outcomes = Vec::with_capacity(handles.len());
        for (label, address, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(device = %label, error = %e, "Transfer worker aborted");
                    Outcome::failed(&label, &address, None, format!("worker aborted: {e}"))
                }
            };
            outcomes.push(outcome);
        }

        match reporter.await {
            Ok(updates) => debug!(updates, "Progress reporter drained"),
            Err(e) => warn!(error = %e, "Progress reporter ended abnormally"),
        }

        let mut summary = RunSummary::new(root, outcomes);
        if summary.all_failed() {
            summary.root_discarded = discard_root(&summary.destination_root);
        }
        append_error_log(&self.ctx.config.error_log, &summary.outcomes);

        info!(
            succeeded = summary.count(OutcomeStatus::Success),
            partial = summary.count(OutcomeStatus::Partial),
            failed = summary.count(OutcomeStatus::Failed),
            root_discarded = summary.root_discarded,
            "Backup finished"
        );
        Ok(summary)
    }
}

/// Create `Job{id}_{timestamp}` under `folder`, adding `_1`, `_2`, ... if a
/// directory of that name already exists. Never reuses an existing root.
pub fn create_destination_root(
    folder: &Path,
    job_id: &str,
    timestamp: &str,
) -> Result<PathBuf, RunError> {
    let fail = |path: &Path, source: std::io::Error| RunError::DestinationRoot {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(folder).map_err(|e| fail(folder, e))?;

    let base = format!("Job{job_id}_{timestamp}");
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            base.clone()
        } else {
            format!("{base}_{suffix}")
        };
        let candidate = folder.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(fail(&candidate, e)),
        }
    }
}

/// Remove the root if nothing is left in it. Partial results keep it alive.
fn discard_root(root: &Path) -> bool {
    match std::fs::remove_dir(root) {
        Ok(()) => {
            info!(root = %root.display(), "Removed empty destination root");
            true
        }
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Destination root kept");
            false
        }
    }
}
