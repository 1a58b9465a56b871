use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Prefix applied to short-form addresses such as `20` -> `192.168.1.20`.
pub const DEFAULT_SUBNET_PREFIX: &str = "192.168.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One robot controller reachable over FTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: String,
    /// Robot number as entered by the operator, e.g. `"3"` for `R3`.
    pub number: String,
    /// `None` means anonymous login.
    pub credentials: Option<Credentials>,
}

impl Device {
    pub fn label(&self) -> String {
        format!("R{}", self.number)
    }
}

/// Selects which fixed remote directory a job backs up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Category {
    /// Full memory device backup.
    #[serde(rename = "MD")]
    #[value(name = "md")]
    Md,
    /// All-of-above backup.
    #[serde(rename = "AOA")]
    #[value(name = "aoa")]
    Aoa,
}

impl Category {
    pub fn remote_dir(self) -> &'static str {
        match self {
            Self::Md => "md:",
            Self::Aoa => "mdb:",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md => "MD",
            Self::Aoa => "AOA",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand a short-form address (a bare trailing octet) with `prefix`.
///
/// Anything containing a `.` or a `:` is taken to be a full address already.
pub fn normalize_address(entry: &str, prefix: &str) -> String {
    let entry = entry.trim();
    if entry.contains('.') || entry.contains(':') {
        entry.to_string()
    } else {
        format!("{}.{}", prefix.trim_end_matches('.'), entry)
    }
}

/// A named backup configuration. Construction enforces that every address
/// has exactly one robot number and that no two devices share a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobRecord", into = "JobRecord")]
pub struct BackupJob {
    folder: PathBuf,
    category: Category,
    devices: Vec<Device>,
}

impl BackupJob {
    pub fn new(
        folder: impl Into<PathBuf>,
        category: Category,
        addresses: Vec<String>,
        numbers: Vec<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, ConfigError> {
        if addresses.len() != numbers.len() {
            return Err(ConfigError::CountMismatch {
                addresses: addresses.len(),
                numbers: numbers.len(),
            });
        }
        if addresses.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        for number in &numbers {
            if !seen.insert(number.as_str()) {
                return Err(ConfigError::DuplicateNumber(number.clone()));
            }
        }

        let devices = addresses
            .into_iter()
            .zip(numbers)
            .map(|(address, number)| Device {
                address,
                number,
                credentials: credentials.clone(),
            })
            .collect();

        Ok(Self {
            folder: folder.into(),
            category,
            devices,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

/// On-disk shape of a job in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    folder: PathBuf,
    ips: Vec<String>,
    nums: Vec<String>,
    #[serde(rename = "type")]
    category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<Credentials>,
}

impl TryFrom<JobRecord> for BackupJob {
    type Error = ConfigError;

    /// Hand-edited store entries may hold bare host numbers; those are
    /// expanded with the default subnet prefix.
    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let ips = record
            .ips
            .iter()
            .map(|ip| normalize_address(ip, DEFAULT_SUBNET_PREFIX))
            .collect();
        BackupJob::new(
            record.folder,
            record.category,
            ips,
            record.nums,
            record.credentials,
        )
    }
}

impl From<BackupJob> for JobRecord {
    fn from(job: BackupJob) -> Self {
        let credentials = job.devices.first().and_then(|d| d.credentials.clone());
        let (ips, nums) = job
            .devices
            .into_iter()
            .map(|d| (d.address, d.number))
            .unzip();
        Self {
            folder: job.folder,
            ips,
            nums,
            category: job.category,
            credentials,
        }
    }
}

/// The runtime unit of work: one device of one job, with its own
/// destination subdirectory under the run's root.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: String,
    pub device: Device,
    pub category: Category,
    pub destination: PathBuf,
}

impl TransferTask {
    pub fn new(device: Device, category: Category, job_root: &Path) -> Self {
        let id = device.label();
        let destination = job_root.join(&id);
        Self {
            id,
            device,
            category,
            destination,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "Success",
            Self::Partial => "Partial",
            Self::Failed => "Failed",
        })
    }
}

/// Terminal result for one transfer task.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub device: String,
    pub address: String,
    pub status: OutcomeStatus,
    pub files_retrieved: usize,
    pub files_listed: Option<usize>,
    pub message: Option<String>,
}

impl Outcome {
    pub fn success(task: &TransferTask, files: usize) -> Self {
        Self {
            device: task.id.clone(),
            address: task.device.address.clone(),
            status: OutcomeStatus::Success,
            files_retrieved: files,
            files_listed: Some(files),
            message: None,
        }
    }

    pub fn partial(
        task: &TransferTask,
        retrieved: usize,
        listed: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: task.id.clone(),
            address: task.device.address.clone(),
            status: OutcomeStatus::Partial,
            files_retrieved: retrieved,
            files_listed: listed,
            message: Some(message.into()),
        }
    }

    pub fn failed(
        device: impl Into<String>,
        address: impl Into<String>,
        listed: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            address: address.into(),
            status: OutcomeStatus::Failed,
            files_retrieved: 0,
            files_listed: listed,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
