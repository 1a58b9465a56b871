pub mod error;
pub mod models;
pub mod orchestrator;
pub mod prober;
pub mod progress;
pub mod retry;
pub mod session;
pub mod summary;
pub mod worker;

pub use error::{ConfigError, RunError, SessionError, TransferError};
pub use models::{BackupJob, Category, Credentials, Device, Outcome, OutcomeStatus, TransferTask};
pub use orchestrator::Orchestrator;
pub use prober::{LivenessProbe, PingProbe};
pub use retry::{RetryDecision, RetryPolicy, RetryPrompt};
pub use session::{Connector, DeviceSession, RemoteConnection};
pub use summary::RunSummary;
pub use worker::{TransferWorker, WorkerContext};
