//! FTP control-channel codec: CRLF-terminated commands out, numbered
//! (possibly multi-line) replies in.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

use super::{FtpError, FtpResult};

/// A complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Text of the final line without the reply code.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or("").trim())
            .unwrap_or("")
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Await an I/O future, failing with [`FtpError::Timeout`] after `limit`.
pub(crate) async fn within<T, F>(limit: Duration, fut: F) -> FtpResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FtpError::Timeout),
    }
}

pub struct ControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            timeout,
        }
    }

    pub async fn send(&mut self, command: &str) -> FtpResult<()> {
        if command.starts_with("PASS ") {
            trace!(">>> PASS ****");
        } else {
            trace!(">>> {}", command);
        }
        let line = format!("{}\r\n", command);
        within(self.timeout, self.writer.write_all(line.as_bytes())).await
    }

    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = within(self.timeout, self.reader.read_line(&mut buf)).await?;
        if n == 0 {
            return Err(FtpError::Disconnected);
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read one reply. A first line of the form `NNN-text` opens a multi-line
    /// reply that runs until a line starting with `NNN `.
    pub async fn read_reply(&mut self) -> FtpResult<Reply> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let multi = first.as_bytes().get(3) == Some(&b'-');
        let mut lines = vec![first];

        if multi {
            let terminator = format!("{} ", code);
            let bare = code.to_string();
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator) || next == bare;
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = Reply { code, lines };
        trace!("<<< {}", reply.lines.last().map(String::as_str).unwrap_or(""));
        Ok(reply)
    }

    pub async fn execute(&mut self, command: &str) -> FtpResult<Reply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Execute a command that must complete with a 2xx reply.
    pub async fn expect_completion(&mut self, command: &str) -> FtpResult<Reply> {
        let reply = self.execute(command).await?;
        if !reply.is_completion() {
            return Err(FtpError::rejected(command, &reply));
        }
        Ok(reply)
    }
}

fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| FtpError::Protocol(format!("invalid reply line '{}'", line)))
}
