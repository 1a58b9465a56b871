//! One protocol session against one device: connect, log in, enter the
//! category directory, list, then fetch every file sequentially.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::error::SessionError;
use super::models::{Category, Credentials, Device};
use crate::ftp::FtpResult;

/// Names starting with this marker are hidden and never backed up.
pub const HIDDEN_MARKER: char = '.';

/// Opens protocol connections to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str, timeout: Duration)
    -> FtpResult<Box<dyn RemoteConnection>>;
}

/// An open, stateful connection to a device.
#[async_trait]
pub trait RemoteConnection: Send {
    /// Authenticate; `None` means anonymous.
    async fn login(&mut self, credentials: Option<&Credentials>) -> FtpResult<()>;

    async fn change_dir(&mut self, path: &str) -> FtpResult<()>;

    async fn list(&mut self) -> FtpResult<Vec<String>>;

    /// Write the whole remote file into `sink`.
    async fn retrieve(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64>;

    async fn close(&mut self) -> FtpResult<()>;
}

/// Receives session milestones while an attempt runs.
pub trait SessionObserver: Send {
    /// The remote listing is known.
    fn listed(&mut self, total: usize);

    /// `name` has been stored locally; `completed` files so far.
    fn retrieved(&mut self, name: &str, completed: usize);
}

/// What one attempt achieved. `error` is `None` only when every listed
/// file was retrieved.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub files_listed: Option<usize>,
    pub files_retrieved: usize,
    pub error: Option<SessionError>,
}

pub struct DeviceSession {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
}

impl DeviceSession {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// Run one attempt. Never retries; the first failure ends the attempt
    /// and is returned together with the number of files already stored.
    pub async fn run(
        &self,
        device: &Device,
        category: Category,
        destination: &Path,
        observer: &mut dyn SessionObserver,
    ) -> SessionReport {
        let mut report = SessionReport::default();
        if let Err(e) = self
            .transfer(device, category, destination, observer, &mut report)
            .await
        {
            report.error = Some(e);
        }
        report
    }

    async fn transfer(
        &self,
        device: &Device,
        category: Category,
        destination: &Path,
        observer: &mut dyn SessionObserver,
        report: &mut SessionReport,
    ) -> Result<(), SessionError> {
        let mut conn = self
            .connector
            .connect(&device.address, self.connect_timeout)
            .await
            .map_err(SessionError::Connect)?;

        conn.login(device.credentials.as_ref())
            .await
            .map_err(SessionError::Auth)?;

        let dir = category.remote_dir();
        conn.change_dir(dir)
            .await
            .map_err(|source| SessionError::Navigation {
                path: dir.to_string(),
                source,
            })?;

        let names = select_entries(conn.list().await.map_err(SessionError::Listing)?);
        debug!(files = names.len(), dir, "remote listing");
        report.files_listed = Some(names.len());
        observer.listed(names.len());

        tokio::fs::create_dir_all(destination).await?;

        for name in &names {
            fetch_file(conn.as_mut(), name, destination).await?;
            report.files_retrieved += 1;
            observer.retrieved(name, report.files_retrieved);
        }

        if let Err(e) = conn.close().await {
            debug!(error = %e, "QUIT failed after a complete transfer");
        }
        Ok(())
    }
}

/// Filter a remote listing down to the entries that will be fetched:
/// hidden entries are dropped, and so is anything that is not a plain file
/// name and could escape the destination directory.
pub fn select_entries(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| {
            if name.is_empty() || name.starts_with(HIDDEN_MARKER) {
                return false;
            }
            if name.contains(['/', '\\', '\0']) {
                warn!(name = %name, "skipping remote entry with path separators");
                return false;
            }
            true
        })
        .collect()
}

/// Download into a hidden sibling and rename into place once complete, so a
/// file on disk is either whole or absent.
async fn fetch_file(
    conn: &mut dyn RemoteConnection,
    name: &str,
    destination: &Path,
) -> Result<(), SessionError> {
    let partial = destination.join(format!("{HIDDEN_MARKER}{name}.part"));
    let target = destination.join(name);

    let mut file = tokio::fs::File::create(&partial).await?;
    match conn.retrieve(name, &mut file).await {
        Ok(bytes) => {
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&partial, &target).await?;
            trace!(file = %name, bytes, "retrieved");
            Ok(())
        }
        Err(source) => {
            drop(file);
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!(file = %partial.display(), error = %e, "could not remove partial download");
            }
            Err(SessionError::Retrieve {
                name: name.to_string(),
                source,
            })
        }
    }
}
