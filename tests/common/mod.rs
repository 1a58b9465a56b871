#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use robobak::config::AppConfig;
use robobak::context::AppContext;
use robobak::core::{Connector, Credentials, LivenessProbe, RemoteConnection, RetryPrompt};
use robobak::ftp::{FtpError, FtpResult};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;

pub fn context(dir: &Path, headless: bool) -> AppContext {
    AppContext::new(AppConfig {
        error_log: dir.join("error_log.txt"),
        jobs_file: dir.join("job_configs.json"),
        headless,
        connect_timeout_secs: 2,
        ..AppConfig::default()
    })
}

pub fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Loopback FTP server
// ---------------------------------------------------------------------------

pub struct FtpScript {
    pub files: Vec<(String, Vec<u8>)>,
    /// Per control connection, in accept order: close the session instead of
    /// answering the RETR that follows this many completed downloads.
    pub drops: Vec<Option<usize>>,
    /// `None` accepts only anonymous logins.
    pub credentials: Option<(String, String)>,
    /// Reply line that refuses every NLST instead of listing `files`.
    pub listing_refusal: Option<String>,
}

impl FtpScript {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(n, b)| (n.to_string(), b.as_bytes().to_vec()))
                .collect(),
            drops: Vec::new(),
            credentials: None,
            listing_refusal: None,
        }
    }
}

pub struct FtpServer {
    pub port: u16,
    sessions: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FtpServer {
    pub async fn start(script: FtpScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let script = Arc::new(script);
        let sessions = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&sessions);
        let log = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, index, Arc::clone(&script), Arc::clone(&log)));
            }
        });

        Self {
            port,
            sessions,
            commands,
        }
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

async fn reply(out: &mut OwnedWriteHalf, line: &str) {
    let _ = out.write_all(format!("{line}\r\n").as_bytes()).await;
}

async fn serve(
    stream: tokio::net::TcpStream,
    index: usize,
    script: Arc<FtpScript>,
    log: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut out) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let drop_after = script.drops.get(index).copied().flatten();
    let mut retrieved = 0usize;
    let mut passive: Option<TcpListener> = None;
    let mut user = String::new();

    reply(&mut out, "220 Robot FTP server ready").await;
    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().unwrap().push(line.clone());
        let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match verb {
            "USER" => {
                user = arg.to_string();
                reply(&mut out, "331 Password required").await;
            }
            "PASS" => {
                let accepted = match &script.credentials {
                    None => user == "anonymous",
                    Some((u, p)) => user == *u && arg == p,
                };
                if accepted {
                    reply(&mut out, "230 Logged in").await;
                } else {
                    reply(&mut out, "530 Login incorrect").await;
                }
            }
            "TYPE" => reply(&mut out, "200 Type set").await,
            "CWD" if arg == "md:" || arg == "mdb:" => {
                reply(&mut out, "250 Directory changed").await
            }
            "CWD" => reply(&mut out, "550 No such device").await,
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                reply(
                    &mut out,
                    &format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    ),
                )
                .await;
                passive = Some(listener);
            }
            "NLST" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 Use PASV first").await;
                    continue;
                };
                if let Some(refusal) = &script.listing_refusal {
                    drop(listener);
                    reply(&mut out, refusal).await;
                    continue;
                }
                reply(&mut out, "150 Opening data connection").await;
                let (mut data, _) = listener.accept().await.unwrap();
                let listing: String = script
                    .files
                    .iter()
                    .map(|(name, _)| format!("{name}\r\n"))
                    .collect();
                let _ = data.write_all(listing.as_bytes()).await;
                drop(data);
                reply(&mut out, "226 Transfer complete").await;
            }
            "RETR" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 Use PASV first").await;
                    continue;
                };
                let Some((_, body)) = script.files.iter().find(|(name, _)| name == arg) else {
                    reply(&mut out, "550 File not found").await;
                    continue;
                };
                reply(&mut out, "150 Opening data connection").await;
                let (mut data, _) = listener.accept().await.unwrap();
                if drop_after == Some(retrieved) {
                    return;
                }
                let _ = data.write_all(body).await;
                drop(data);
                retrieved += 1;
                reply(&mut out, "226 Transfer complete").await;
            }
            "QUIT" => {
                reply(&mut out, "221 Bye").await;
                return;
            }
            _ => reply(&mut out, "502 Not implemented").await,
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// What one connection attempt to a device does.
#[derive(Debug, Clone)]
pub enum Attempt {
    Refuse,
    /// Never completes the connection.
    Hang,
    Serve {
        files: Vec<&'static str>,
        drop_after: Option<usize>,
    },
}

impl Attempt {
    pub fn serve(files: &[&'static str]) -> Self {
        Self::Serve {
            files: files.to_vec(),
            drop_after: None,
        }
    }

    pub fn drop_after(files: &[&'static str], completed: usize) -> Self {
        Self::Serve {
            files: files.to_vec(),
            drop_after: Some(completed),
        }
    }
}

/// Plays back a fixed list of attempts per address; an exhausted script
/// refuses further connections.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, VecDeque<Attempt>>>,
    connects: Mutex<HashMap<String, usize>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, address: &str, attempts: Vec<Attempt>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.to_string(), attempts.into());
        self
    }

    pub fn connects(&self, address: &str) -> usize {
        self.connects
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> FtpResult<Box<dyn RemoteConnection>> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default() += 1;
        let attempt = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Attempt::Refuse);

        match attempt {
            Attempt::Refuse => Err(FtpError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Attempt::Hang => std::future::pending::<FtpResult<Box<dyn RemoteConnection>>>().await,
            Attempt::Serve { files, drop_after } => {
                let conn: Box<dyn RemoteConnection> = Box::new(FakeConnection {
                    files,
                    drop_after,
                    retrieved: 0,
                });
                Ok(conn)
            }
        }
    }
}

struct FakeConnection {
    files: Vec<&'static str>,
    drop_after: Option<usize>,
    retrieved: usize,
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    async fn login(&mut self, _credentials: Option<&Credentials>) -> FtpResult<()> {
        Ok(())
    }

    async fn change_dir(&mut self, _path: &str) -> FtpResult<()> {
        Ok(())
    }

    async fn list(&mut self) -> FtpResult<Vec<String>> {
        Ok(self.files.iter().map(|s| s.to_string()).collect())
    }

    async fn retrieve(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64> {
        if self.drop_after == Some(self.retrieved) {
            return Err(FtpError::Disconnected);
        }
        let body = format!("contents of {name}");
        sink.write_all(body.as_bytes()).await?;
        self.retrieved += 1;
        Ok(body.len() as u64)
    }

    async fn close(&mut self) -> FtpResult<()> {
        Ok(())
    }
}

/// Reports every address live except the listed ones.
#[derive(Default)]
pub struct FakeProbe {
    down: HashSet<String>,
}

impl FakeProbe {
    pub fn all_live() -> Self {
        Self::default()
    }

    pub fn down(addresses: &[&str]) -> Self {
        Self {
            down: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn probe(&self, address: &str) -> bool {
        !self.down.contains(address)
    }
}

/// Prompt for runs that must never restart on the operator's word.
pub fn declining() -> Arc<CannedPrompt> {
    Arc::new(CannedPrompt::answering(false))
}

/// Gives the same answer to every restart question and counts them.
pub struct CannedPrompt {
    answer: bool,
    asked: AtomicUsize,
}

impl CannedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryPrompt for CannedPrompt {
    async fn confirm_restart(&self, _task: &str, _retrieved: usize, _listed: Option<usize>) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
