//! Minimal plain-TCP FTP client (RFC 959 subset) used to pull backups from
//! robot controllers.
//!
//! - `codec`: control-channel command/reply framing
//! - `client`: login, directory change, passive NLST/RETR

mod client;
mod codec;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::core::models::Credentials;
use crate::core::session::{Connector, RemoteConnection};

pub use client::{FTP_PORT, FtpClient, parse_pasv};
pub use codec::Reply;

#[derive(Error, Debug)]
pub enum FtpError {
    #[error("timed out")]
    Timeout,

    #[error("connection closed by server")]
    Disconnected,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{command} rejected: {code} {message}")]
    Rejected {
        command: String,
        code: u16,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

impl FtpError {
    /// Build a rejection error. Only the command verb is kept so that
    /// credentials never end up in diagnostics.
    pub fn rejected(command: &str, reply: &Reply) -> Self {
        let verb = command.split_whitespace().next().unwrap_or(command);
        Self::Rejected {
            command: verb.to_string(),
            code: reply.code,
            message: reply.message().to_string(),
        }
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

/// Opens FTP sessions to robot controllers.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    port: u16,
}

impl Default for FtpConnector {
    fn default() -> Self {
        Self { port: FTP_PORT }
    }
}

impl FtpConnector {
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> FtpResult<Box<dyn RemoteConnection>> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| FtpError::InvalidAddress(address.to_string()))?;
        let client = FtpClient::connect(SocketAddr::new(ip, self.port), timeout).await?;
        Ok(Box::new(client))
    }
}

#[async_trait]
impl RemoteConnection for FtpClient {
    async fn login(&mut self, credentials: Option<&Credentials>) -> FtpResult<()> {
        let user = credentials.map(|c| (c.username.as_str(), c.password.as_str()));
        FtpClient::login(self, user).await?;
        self.binary().await
    }

    async fn change_dir(&mut self, path: &str) -> FtpResult<()> {
        self.cwd(path).await
    }

    async fn list(&mut self) -> FtpResult<Vec<String>> {
        self.nlst().await
    }

    async fn retrieve(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64> {
        FtpClient::retrieve(self, name, sink).await
    }

    async fn close(&mut self) -> FtpResult<()> {
        self.quit().await
    }
}
