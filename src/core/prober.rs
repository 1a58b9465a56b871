//! Reachability check run before any FTP session is attempted.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// True if `address` answered. Never fails; any problem reads as "not live".
    async fn probe(&self, address: &str) -> bool;
}

/// Sends a single ICMP echo request through the system `ping` utility.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Syntactic check: an IPv4 dotted quad or an IPv6 literal.
pub fn parse_address(address: &str) -> Option<IpAddr> {
    address.trim().parse().ok()
}

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn probe(&self, address: &str) -> bool {
        let Some(ip) = parse_address(address) else {
            debug!(address, "malformed address, not probing");
            return false;
        };

        let mut cmd = ping_command(ip, self.timeout);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // ping enforces its own deadline; this only guards against a hung child.
        let deadline = self.timeout + Duration::from_secs(2);
        match tokio::time::timeout(deadline, cmd.status()).await {
            Ok(Ok(status)) => {
                debug!(address, live = status.success(), "ping finished");
                status.success()
            }
            Ok(Err(e)) => {
                warn!(address, error = %e, "failed to execute ping");
                false
            }
            Err(_) => {
                debug!(address, "ping did not finish in time");
                false
            }
        }
    }
}

#[cfg(windows)]
fn ping_command(ip: IpAddr, timeout: Duration) -> Command {
    let mut cmd = Command::new("ping");
    cmd.arg("-n")
        .arg("1")
        .arg("-w")
        .arg(timeout.as_millis().max(1).to_string())
        .arg(ip.to_string());
    cmd
}

#[cfg(target_os = "macos")]
fn ping_command(ip: IpAddr, timeout: Duration) -> Command {
    let mut cmd = Command::new(if ip.is_ipv6() { "ping6" } else { "ping" });
    cmd.arg("-c").arg("1");
    if ip.is_ipv4() {
        cmd.arg("-W").arg(timeout.as_millis().max(1).to_string());
    }
    cmd.arg(ip.to_string());
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn ping_command(ip: IpAddr, timeout: Duration) -> Command {
    // -W takes whole seconds here.
    let secs = timeout.as_millis().div_ceil(1000).max(1);
    let mut cmd = Command::new("ping");
    cmd.arg("-c")
        .arg("1")
        .arg("-W")
        .arg(secs.to_string())
        .arg(ip.to_string());
    cmd
}
