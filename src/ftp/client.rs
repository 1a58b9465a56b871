//! Stateful FTP client owning one control connection.
//!
//! Lifecycle: `connect()` (greeting) -> `login()` -> `cwd()` ->
//! `nlst()` / `retrieve()` over passive data connections -> `quit()`.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::codec::{ControlChannel, Reply, within};
use super::{FtpError, FtpResult};

/// Default FTP control port.
pub const FTP_PORT: u16 = 21;

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";
const COPY_BUFFER: usize = 64 * 1024;

static PASV_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")
        .expect("static regex")
});

pub struct FtpClient {
    control: ControlChannel,
    peer: IpAddr,
    timeout: Duration,
}

impl FtpClient {
    /// Open the control connection and consume the server greeting.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> FtpResult<Self> {
        let stream = within(timeout, TcpStream::connect(addr)).await?;
        let mut control = ControlChannel::new(stream, timeout);

        let greeting = control.read_reply().await?;
        if !greeting.is_completion() {
            return Err(FtpError::rejected("greeting", &greeting));
        }
        debug!(%addr, banner = %greeting.message(), "FTP connected");

        Ok(Self {
            control,
            peer: addr.ip(),
            timeout,
        })
    }

    /// Log in with the given credentials, or anonymously when `None`.
    pub async fn login(&mut self, user: Option<(&str, &str)>) -> FtpResult<()> {
        let (user, password) = user.unwrap_or((ANONYMOUS_USER, ANONYMOUS_PASSWORD));

        let reply = self.control.execute(&format!("USER {}", user)).await?;
        match reply.code {
            230 => return Ok(()),
            331 | 332 => {}
            _ => return Err(FtpError::rejected("USER", &reply)),
        }

        let reply = self.control.execute(&format!("PASS {}", password)).await?;
        if reply.code != 230 && reply.code != 202 {
            return Err(FtpError::rejected("PASS", &reply));
        }
        Ok(())
    }

    pub async fn binary(&mut self) -> FtpResult<()> {
        self.control.expect_completion("TYPE I").await.map(drop)
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.control
            .expect_completion(&format!("CWD {}", path))
            .await
            .map(drop)
    }

    /// Bare name listing of the current directory.
    pub async fn nlst(&mut self) -> FtpResult<Vec<String>> {
        let mut data = self.open_passive().await?;

        let reply = self.control.execute("NLST").await?;
        if is_empty_listing(&reply) {
            return Ok(Vec::new());
        }
        if !reply.is_preliminary() && !reply.is_completion() {
            return Err(FtpError::rejected("NLST", &reply));
        }

        let mut raw = Vec::new();
        within(self.timeout, data.read_to_end(&mut raw)).await?;
        drop(data);
        if reply.is_preliminary() {
            self.finish_transfer("NLST").await?;
        }

        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Download `name` in full into `sink`, returning the byte count.
    pub async fn retrieve<W>(&mut self, name: &str, sink: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut data = self.open_passive().await?;

        let command = format!("RETR {}", name);
        let reply = self.control.execute(&command).await?;
        if !reply.is_preliminary() {
            return Err(FtpError::rejected(&command, &reply));
        }

        let bytes = copy_with_timeout(&mut data, sink, self.timeout).await?;
        drop(data);
        self.finish_transfer(&command).await?;
        Ok(bytes)
    }

    pub async fn quit(&mut self) -> FtpResult<()> {
        self.control.execute("QUIT").await.map(drop)
    }

    async fn open_passive(&mut self) -> FtpResult<TcpStream> {
        let reply = self.control.expect_completion("PASV").await?;
        let mut addr = parse_pasv(&reply.text())?;
        // Servers behind NAT sometimes advertise 0.0.0.0.
        if addr.ip().is_unspecified() {
            addr.set_ip(self.peer);
        }
        within(self.timeout, TcpStream::connect(addr)).await
    }

    /// Consume the 2xx that closes a data transfer.
    async fn finish_transfer(&mut self, command: &str) -> FtpResult<()> {
        let reply = self.control.read_reply().await?;
        if !reply.is_completion() {
            return Err(FtpError::rejected(command, &reply));
        }
        Ok(())
    }
}

/// A 450/550 to NLST means an empty directory only when the server says
/// so; any other refusal is a failed listing.
fn is_empty_listing(reply: &Reply) -> bool {
    matches!(reply.code, 450 | 550) && reply.message().to_ascii_lowercase().contains("no files")
}

async fn copy_with_timeout<R, W>(reader: &mut R, writer: &mut W, limit: Duration) -> FtpResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = within(limit, reader.read(&mut buf)).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Parse `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub fn parse_pasv(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_ADDR
        .captures(text)
        .ok_or_else(|| FtpError::Protocol(format!("cannot parse PASV reply '{}'", text)))?;

    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse()
            .map_err(|_| FtpError::Protocol("PASV number out of range".into()))?;
    }

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}
