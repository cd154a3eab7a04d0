//! SFTP protocol backend.
//!
//! `ssh2` is a blocking client; calls run on the tokio blocking pool
//! with the session moved in and out.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::protocol::RemoteProtocol;
use crate::{Result, WalkerError};

/// SFTP-backed remote source.
pub struct SftpSource {
    host: String,
    port: u16,
    username: String,
    password: String,
    session: Option<Session>,
}

impl SftpSource {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            session: None,
        }
    }

    fn take_session(&mut self) -> Result<Session> {
        self.session.take().ok_or(WalkerError::NotConnected)
    }
}

fn ssh_err(e: ssh2::Error) -> WalkerError {
    match e.code() {
        // SSH_FX_NO_SUCH_FILE
        ssh2::ErrorCode::SFTP(2) => WalkerError::PathNotFound(e.to_string()),
        _ => WalkerError::Connection(e.to_string()),
    }
}

#[async_trait]
impl RemoteProtocol for SftpSource {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.host.trim_end_matches('/'), self.port);
        let username = self.username.clone();
        let password = self.password.clone();

        let session = spawn_blocking(move || -> Result<Session> {
            let socket_addr = addr
                .to_socket_addrs()
                .map_err(|e| WalkerError::Connection(e.to_string()))?
                .next()
                .ok_or_else(|| WalkerError::Connection(format!("cannot resolve {addr}")))?;
            let tcp = TcpStream::connect_timeout(&socket_addr, Duration::from_secs(30))
                .map_err(|e| WalkerError::Connection(e.to_string()))?;
            let mut session =
                Session::new().map_err(|e| WalkerError::Connection(e.to_string()))?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|e| WalkerError::Connection(e.to_string()))?;
            session
                .userauth_password(&username, &password)
                .map_err(|e| WalkerError::Auth(e.to_string()))?;
            Ok(session)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))??;

        debug!(host = %self.host, "sftp connected");
        self.session = Some(session);
        Ok(())
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let session = self.take_session()?;
        let path = path.to_string();

        let (session, result) = spawn_blocking(move || {
            let listing = session.sftp().and_then(|sftp| {
                sftp.readdir(Path::new(&path))
            });
            (session, listing)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))?;
        self.session = Some(session);

        let entries = result.map_err(ssh_err)?;
        let mut names: Vec<String> = entries
            .into_iter()
            .filter_map(|(path, _stat)| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let session = self.take_session()?;
        let remote_path = PathBuf::from(remote_path);

        let (session, result) = spawn_blocking(move || {
            let fetch = || -> Result<Vec<u8>> {
                let sftp = session.sftp().map_err(ssh_err)?;
                let mut file = sftp.open(&remote_path).map_err(ssh_err)?;
                let mut buffer = Vec::new();
                file.read_to_end(&mut buffer)?;
                Ok(buffer)
            };
            let result = fetch();
            (session, result)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))?;
        self.session = Some(session);

        let buffer = result?;
        let mut file = std::fs::File::create(local_path)?;
        file.write_all(&buffer)?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = spawn_blocking(move || {
                let _ = session.disconnect(None, "done", None);
            })
            .await;
        }
    }
}
