//! Local filesystem backend.
//!
//! Treats a directory tree on disk exactly like a remote host; useful
//! for sources mounted via NFS and for tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::protocol::RemoteProtocol;
use crate::{Result, WalkerError};

/// Local-directory-backed source.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl RemoteProtocol for LocalSource {
    async fn connect(&mut self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(WalkerError::PathNotFound(
                self.root.to_string_lossy().into_owned(),
            ))
        }
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let dir = self.resolve(path);
        if !dir.is_dir() {
            return Err(WalkerError::PathNotFound(dir.to_string_lossy().into_owned()));
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let source = self.resolve(remote_path);
        if source.is_file() {
            std::fs::copy(&source, local_path)?;
            return Ok(());
        }
        // Container formats (Zarr groups) are directories on disk.
        if source.is_dir() {
            copy_dir(&source, local_path)?;
            return Ok(());
        }
        Err(WalkerError::PathNotFound(
            source.to_string_lossy().into_owned(),
        ))
    }

    async fn close(&mut self) {}
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_fetch() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::create_dir(remote.path().join("2004")).unwrap();
        std::fs::write(remote.path().join("2004/a.tif"), b"img").unwrap();

        let mut source = LocalSource::new(remote.path());
        source.connect().await.unwrap();
        assert_eq!(source.list_dir("").await.unwrap(), vec!["2004"]);
        assert_eq!(source.list_dir("2004").await.unwrap(), vec!["a.tif"]);

        let local = tempfile::tempdir().unwrap();
        let target = local.path().join("a.tif");
        source.fetch("2004/a.tif", &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"img");

        assert!(matches!(
            source.list_dir("1999").await,
            Err(WalkerError::PathNotFound(_))
        ));
    }
}
