//! Remote source walking: protocol-specific directory traversal,
//! date-filtered listing and idempotent fetching.
//!
//! One walker invocation runs `connect -> list root -> [list subdir]* ->
//! filter by date -> fetch each -> close`. Directory descent depth
//! follows the source's directory-tree shape (none, year, year/month or
//! year/month/day); subtrees outside the requested date range are pruned
//! before being listed. Files already present locally are never fetched
//! again, which makes repeated sync runs cheap to resume.

pub mod ftp;
pub mod http;
pub mod local;
pub mod protocol;
pub mod sftp;
pub mod template;
pub mod walker;

use chrono::NaiveDateTime;
use serde::Deserialize;
use thiserror::Error;

pub use ftp::FtpSource;
pub use http::HttpSource;
pub use local::LocalSource;
pub use protocol::RemoteProtocol;
pub use sftp::SftpSource;
pub use template::FileDateTemplate;
pub use walker::{FetchOutcome, WalkSummary, Walker};

/// Errors raised while walking or fetching from a remote source.
#[derive(Error, Debug)]
pub enum WalkerError {
    /// Could not reach the remote host, or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote host rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A listed path does not exist on the remote.
    #[error("remote path not found: {0}")]
    PathNotFound(String),

    /// The filename does not match the source's date template.
    #[error("filename {name} does not match the date template: {reason}")]
    Template { name: String, reason: String },

    /// Protocol methods called before `connect`.
    #[error("not connected")]
    NotConnected,

    /// Local filesystem failure while storing a fetched file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for walker operations.
pub type Result<T> = std::result::Result<T, WalkerError>;

/// One level of the remote directory tree, named by what the
/// subdirectory encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirLevel {
    Year,
    Month,
    Day,
}

/// A remote file discovered by traversal, with the date decoded from
/// its name. Produced by the walker's planning pass and consumed once
/// by the fetch pass.
#[derive(Debug, Clone)]
pub struct RemoteFileRef {
    /// Full remote path, ready to fetch.
    pub path: String,
    /// Bare file name, also used as the local name.
    pub name: String,
    /// Date decoded from the file name.
    pub date: NaiveDateTime,
}
