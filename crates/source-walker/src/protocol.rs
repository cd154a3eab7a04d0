//! The remote protocol boundary.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// A connection-oriented remote file tree.
///
/// Implementations exist for FTP, SFTP, HTTP index pages and the local
/// filesystem. A connection is held for the duration of one walk and
/// released by `close`; the walker reconnects at most once per file
/// after a transient failure.
#[async_trait]
pub trait RemoteProtocol: Send {
    /// Establish the connection. Idempotent on an open connection.
    async fn connect(&mut self) -> Result<()>;

    /// Names of the entries directly under `path` (no recursion).
    ///
    /// Directory entries come back without trailing separators. Fails
    /// with `PathNotFound` when the directory does not exist.
    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>>;

    /// Fetch one remote file into `local_path`.
    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Release the connection. Safe to call repeatedly.
    async fn close(&mut self);
}

/// Join a remote directory and an entry name with a single slash.
pub(crate) fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}
