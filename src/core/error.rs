//! Error types for job configuration, device sessions and backup runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ftp::FtpError;

/// A job definition that cannot be dispatched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{addresses} robot addresses but {numbers} robot numbers")]
    CountMismatch { addresses: usize, numbers: usize },

    #[error("job has no robots")]
    NoDevices,

    #[error("robot number {0} is listed more than once")]
    DuplicateNumber(String),
}

/// Failure of one step of a device session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] FtpError),

    #[error("login failed: {0}")]
    Auth(#[source] FtpError),

    #[error("cannot enter {path}: {source}")]
    Navigation {
        path: String,
        #[source]
        source: FtpError,
    },

    #[error("listing failed: {0}")]
    Listing(#[source] FtpError),

    #[error("local storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("{name}: {source}")]
    Retrieve {
        name: String,
        #[source]
        source: FtpError,
    },
}

/// How a transfer attempt went wrong, as seen by the retry policy.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("offline or unreachable")]
    Unreachable { address: String },

    /// Failed before any file was retrieved.
    #[error("{0}")]
    Connection(SessionError),

    /// Connection lost after at least one file was retrieved.
    #[error("connection lost after {retrieved} files: {source}")]
    Interrupted {
        retrieved: usize,
        #[source]
        source: SessionError,
    },

    /// Best-effort removal of local files failed. Never surfaced in an outcome.
    #[error("cleanup of {path} failed: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn from_session(retrieved: usize, error: SessionError) -> Self {
        if retrieved > 0 {
            Self::Interrupted {
                retrieved,
                source: error,
            }
        } else {
            Self::Connection(error)
        }
    }

    pub fn files_retrieved(&self) -> usize {
        match self {
            Self::Interrupted { retrieved, .. } => *retrieved,
            _ => 0,
        }
    }
}

/// Errors that abort a whole backup run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("cannot create destination root {path}: {source}")]
    DestinationRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
