//! FTP protocol backend.
//!
//! `suppaftp` is a blocking client; every call is moved onto the tokio
//! blocking pool and the stream handed back afterwards.

use std::io::Write;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::{FtpStream, Status};
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::protocol::RemoteProtocol;
use crate::{Result, WalkerError};

/// FTP-backed remote source.
pub struct FtpSource {
    host: String,
    port: u16,
    username: String,
    password: String,
    stream: Option<FtpStream>,
}

impl FtpSource {
    /// Anonymous logins use the conventional `anonymous` user.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.unwrap_or_else(|| "anonymous".to_string()),
            password: password.unwrap_or_default(),
            stream: None,
        }
    }

    fn take_stream(&mut self) -> Result<FtpStream> {
        self.stream.take().ok_or(WalkerError::NotConnected)
    }
}

fn classify(e: suppaftp::FtpError) -> WalkerError {
    match &e {
        suppaftp::FtpError::UnexpectedResponse(response) => match response.status {
            Status::NotLoggedIn | Status::NeedPassword | Status::NeedAccount => {
                WalkerError::Auth(e.to_string())
            }
            Status::FileUnavailable | Status::BadFilename => {
                WalkerError::PathNotFound(e.to_string())
            }
            _ => WalkerError::Connection(e.to_string()),
        },
        _ => WalkerError::Connection(e.to_string()),
    }
}

#[async_trait]
impl RemoteProtocol for FtpSource {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.host.trim_end_matches('/'), self.port);
        let username = self.username.clone();
        let password = self.password.clone();

        let stream = spawn_blocking(move || -> Result<FtpStream> {
            let socket_addr = addr
                .to_socket_addrs()
                .map_err(|e| WalkerError::Connection(e.to_string()))?
                .next()
                .ok_or_else(|| WalkerError::Connection(format!("cannot resolve {addr}")))?;
            let mut stream = FtpStream::connect_timeout(socket_addr, Duration::from_secs(30))
                .map_err(classify)?;
            stream.login(&username, &password).map_err(|e| match e {
                suppaftp::FtpError::UnexpectedResponse(_) => WalkerError::Auth(e.to_string()),
                other => classify(other),
            })?;
            Ok(stream)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))??;

        debug!(host = %self.host, "ftp connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let mut stream = self.take_stream()?;
        let path = path.to_string();

        let (stream, result) = spawn_blocking(move || {
            let listing = stream.nlst(Some(path.as_str()));
            (stream, listing)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))?;
        self.stream = Some(stream);

        let names = result
            .map_err(classify)?
            .into_iter()
            // NLST may return full paths; keep bare entry names.
            .filter_map(|entry| entry.rsplit('/').next().map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect();
        Ok(names)
    }

    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let mut stream = self.take_stream()?;
        let remote_path = remote_path.to_string();

        let (stream, result) = spawn_blocking(move || {
            let data = stream.retr_as_buffer(&remote_path);
            (stream, data)
        })
        .await
        .map_err(|e| WalkerError::Connection(e.to_string()))?;
        self.stream = Some(stream);

        let buffer = result.map_err(classify)?;
        let mut file = std::fs::File::create(local_path)?;
        file.write_all(buffer.get_ref())?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = spawn_blocking(move || stream.quit()).await;
        }
    }
}
