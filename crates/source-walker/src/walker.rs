//! The walk-and-fetch state machine.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDateTime};
use tracing::{debug, info, instrument, trace, warn};

use crate::protocol::{join_remote, RemoteProtocol};
use crate::template::FileDateTemplate;
use crate::{DirLevel, RemoteFileRef, Result, WalkerError};

/// Outcome of one file transfer, consumed by the walker's retry loop.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Downloaded to the given local path.
    Fetched(PathBuf),
    /// A file of the same name already exists locally; never re-fetched.
    AlreadyPresent,
    /// The remote no longer has the file.
    NotFound,
    /// Connection-level failure; worth one reconnect-and-retry.
    Transient(String),
    /// Unrecoverable failure; the whole run is abandoned.
    Fatal(WalkerError),
}

/// Result of one walker invocation.
#[derive(Debug, Default)]
pub struct WalkSummary {
    /// Newly downloaded local files.
    pub downloaded: Vec<PathBuf>,
    /// Files skipped because they were already present locally.
    pub already_present: usize,
    /// Files aborted after the bounded retry; the run itself continued.
    pub failed: usize,
    /// True when the remote had nothing listed for the requested range.
    pub no_data: bool,
}

/// Walks one remote source tree and fetches date-matching files.
pub struct Walker {
    protocol: Box<dyn RemoteProtocol>,
    directory: String,
    levels: Vec<DirLevel>,
    template: FileDateTemplate,
    file_filter: Option<String>,
    download_dir: PathBuf,
}

impl Walker {
    pub fn new(
        protocol: Box<dyn RemoteProtocol>,
        directory: impl Into<String>,
        levels: Vec<DirLevel>,
        template: FileDateTemplate,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            protocol,
            directory: directory.into(),
            levels,
            template,
            file_filter: None,
            download_dir: download_dir.into(),
        }
    }

    /// Only consider remote files whose name contains `pattern`.
    pub fn with_file_filter(mut self, pattern: Option<String>) -> Self {
        self.file_filter = pattern;
        self
    }

    /// Run one full walk: connect, traverse, fetch, close.
    ///
    /// Files already present locally by name are skipped; a transient
    /// failure on a file gets exactly one reconnect-and-retry, and a
    /// second failure aborts that file only. The connection is released
    /// before returning, including on error.
    #[instrument(skip(self), fields(dir = %self.directory))]
    pub async fn run(&mut self, begin: NaiveDateTime, end: NaiveDateTime) -> Result<WalkSummary> {
        std::fs::create_dir_all(&self.download_dir)?;

        self.protocol.connect().await?;
        let result = self.walk(begin, end).await;
        self.protocol.close().await;
        result
    }

    async fn walk(&mut self, begin: NaiveDateTime, end: NaiveDateTime) -> Result<WalkSummary> {
        let plan = self.plan(begin, end).await?;

        let Some(files) = plan else {
            info!("no data available for requested range");
            return Ok(WalkSummary {
                no_data: true,
                ..WalkSummary::default()
            });
        };

        let mut summary = WalkSummary::default();
        for file in files {
            match self.fetch_with_retry(&file).await {
                FetchOutcome::Fetched(path) => {
                    debug!(file = %file.name, "fetched");
                    summary.downloaded.push(path);
                }
                FetchOutcome::AlreadyPresent => {
                    trace!(file = %file.name, "already present, skipping");
                    summary.already_present += 1;
                }
                FetchOutcome::NotFound => {
                    warn!(file = %file.name, "listed but not fetchable");
                    summary.failed += 1;
                }
                FetchOutcome::Transient(reason) => {
                    warn!(file = %file.name, reason, "aborting file after retry");
                    summary.failed += 1;
                }
                FetchOutcome::Fatal(error) => {
                    return Err(error);
                }
            }
        }

        info!(
            downloaded = summary.downloaded.len(),
            already_present = summary.already_present,
            failed = summary.failed,
            "walk complete"
        );
        Ok(summary)
    }

    /// Traverse the directory tree and list the files to fetch.
    ///
    /// Returns `None` when the remote has nothing for the requested
    /// range (the expected year subtree does not exist, or no file in
    /// the final listings). Traversal itself performs no downloads.
    async fn plan(
        &mut self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<Vec<RemoteFileRef>>> {
        let mut dirs: Vec<(String, Vec<u32>)> = vec![(self.directory.clone(), Vec::new())];

        for (depth, level) in self.levels.clone().into_iter().enumerate() {
            let mut next = Vec::new();
            for (dir, lineage) in &dirs {
                let entries = match self.protocol.list_dir(dir).await {
                    Ok(entries) => entries,
                    // A pruned subtree may have vanished; treat it as
                    // absent rather than failing the run.
                    Err(WalkerError::PathNotFound(_)) if depth > 0 => continue,
                    Err(WalkerError::PathNotFound(path)) if depth == 0 => {
                        return Err(WalkerError::PathNotFound(path));
                    }
                    Err(e) => return Err(e),
                };
                for entry in entries {
                    let Ok(value) = entry.parse::<u32>() else {
                        continue;
                    };
                    if !level_in_range(level, value, lineage, begin, end) {
                        continue;
                    }
                    let mut lineage = lineage.clone();
                    lineage.push(value);
                    next.push((join_remote(dir, &entry), lineage));
                }
            }
            if next.is_empty() {
                return Ok(None);
            }
            dirs = next;
        }

        let mut files = Vec::new();
        let mut listed_any = false;
        for (dir, _) in &dirs {
            let entries = match self.protocol.list_dir(dir).await {
                Ok(entries) => entries,
                Err(WalkerError::PathNotFound(_)) if !self.levels.is_empty() => continue,
                Err(e) => return Err(e),
            };
            listed_any = listed_any || !entries.is_empty();
            for name in entries {
                if let Some(filter) = &self.file_filter {
                    if !name.contains(filter.as_str()) {
                        continue;
                    }
                }
                let date = match self.template.parse(&name) {
                    Ok(date) => date,
                    Err(_) => {
                        trace!(entry = %name, "entry does not match date template");
                        continue;
                    }
                };
                if date >= begin && date <= end {
                    files.push(RemoteFileRef {
                        path: join_remote(dir, &name),
                        name,
                        date,
                    });
                }
            }
        }

        if !listed_any {
            return Ok(None);
        }

        files.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        debug!(files = files.len(), "planned remote files");
        Ok(Some(files))
    }

    /// Fetch one file, retrying exactly once after a transient failure.
    async fn fetch_with_retry(&mut self, file: &RemoteFileRef) -> FetchOutcome {
        match self.fetch_once(file).await {
            FetchOutcome::Transient(reason) => {
                warn!(file = %file.name, reason, "transient failure, reconnecting");
                self.protocol.close().await;
                if let Err(e) = self.protocol.connect().await {
                    return FetchOutcome::Transient(e.to_string());
                }
                self.fetch_once(file).await
            }
            outcome => outcome,
        }
    }

    async fn fetch_once(&mut self, file: &RemoteFileRef) -> FetchOutcome {
        let local_path = self.download_dir.join(&file.name);
        if local_path.exists() {
            return FetchOutcome::AlreadyPresent;
        }

        match self.protocol.fetch(&file.path, &local_path).await {
            Ok(()) => FetchOutcome::Fetched(local_path),
            Err(WalkerError::PathNotFound(_)) => FetchOutcome::NotFound,
            Err(WalkerError::Connection(reason)) => {
                // Drop a half-written file so the retry starts clean.
                let _ = std::fs::remove_file(&local_path);
                FetchOutcome::Transient(reason)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&local_path);
                FetchOutcome::Fatal(e)
            }
        }
    }
}

/// Whether a numeric directory entry can contain dates in the range.
fn level_in_range(
    level: DirLevel,
    value: u32,
    lineage: &[u32],
    begin: NaiveDateTime,
    end: NaiveDateTime,
) -> bool {
    match level {
        DirLevel::Year => {
            let year = value as i32;
            year >= begin.year() && year <= end.year()
        }
        DirLevel::Month => {
            let Some(&year) = lineage.first() else {
                return false;
            };
            let year = year as i32;
            if year == begin.year() && value < begin.month() {
                return false;
            }
            if year == end.year() && value > end.month() {
                return false;
            }
            true
        }
        DirLevel::Day => {
            let (Some(&year), Some(&month)) = (lineage.first(), lineage.get(1)) else {
                return false;
            };
            let year = year as i32;
            if year == begin.year() && month == begin.month() && value < begin.day() {
                return false;
            }
            if year == end.year() && month == end.month() && value > end.day() {
                return false;
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSource;
    use chrono::NaiveDate;
    use std::path::Path;

    fn dt(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn dekad_template() -> FileDateTemplate {
        FileDateTemplate {
            year: (3, 7),
            month: (8, 10),
            day: None,
            dekad: Some((13, 14)),
            hour: None,
            minute: None,
            second: None,
        }
    }

    fn seed_remote(root: &Path) {
        for (dir, names) in [
            ("2003/12", vec!["rfe2003_12-dk3.tif"]),
            (
                "2004/02",
                vec![
                    "rfe2004_02-dk1.tif",
                    "rfe2004_02-dk2.tif",
                    "rfe2004_02-dk3.tif",
                    "notes.txt",
                ],
            ),
            ("2004/03", vec!["rfe2004_03-dk1.tif"]),
        ] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).unwrap();
            for name in names {
                std::fs::write(path.join(name), name.as_bytes()).unwrap();
            }
        }
    }

    fn walker(remote: &Path, download: &Path) -> Walker {
        Walker::new(
            Box::new(LocalSource::new(remote)),
            "",
            vec![DirLevel::Year, DirLevel::Month],
            dekad_template(),
            download,
        )
    }

    #[tokio::test]
    async fn test_fetches_only_range() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        seed_remote(remote.path());

        let mut walker = walker(remote.path(), download.path());
        let summary = walker.run(dt(2004, 2, 1), dt(2004, 2, 29)).await.unwrap();

        assert!(!summary.no_data);
        assert_eq!(summary.downloaded.len(), 3);
        assert!(download.path().join("rfe2004_02-dk1.tif").exists());
        assert!(!download.path().join("rfe2003_12-dk3.tif").exists());
        assert!(!download.path().join("rfe2004_03-dk1.tif").exists());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        seed_remote(remote.path());

        let mut walker = walker(remote.path(), download.path());
        let first = walker.run(dt(2004, 2, 1), dt(2004, 2, 29)).await.unwrap();
        assert_eq!(first.downloaded.len(), 3);

        let second = walker.run(dt(2004, 2, 1), dt(2004, 2, 29)).await.unwrap();
        assert!(second.downloaded.is_empty());
        assert_eq!(second.already_present, 3);
    }

    #[tokio::test]
    async fn test_no_data_for_absent_year() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        seed_remote(remote.path());

        let mut walker = walker(remote.path(), download.path());
        let summary = walker.run(dt(2010, 1, 1), dt(2010, 12, 31)).await.unwrap();
        assert!(summary.no_data);
        assert!(summary.downloaded.is_empty());
    }

    #[tokio::test]
    async fn test_file_filter() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        seed_remote(remote.path());

        let mut walker =
            walker(remote.path(), download.path()).with_file_filter(Some("dk1".to_string()));
        let summary = walker.run(dt(2004, 2, 1), dt(2004, 3, 31)).await.unwrap();
        let names: Vec<_> = summary
            .downloaded
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["rfe2004_02-dk1.tif", "rfe2004_03-dk1.tif"]);
    }

    #[tokio::test]
    async fn test_flat_listing_without_levels() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("rfe2004_02-dk1.tif"), b"x").unwrap();
        std::fs::write(remote.path().join("rfe2004_02-dk2.tif"), b"x").unwrap();

        let mut walker = Walker::new(
            Box::new(LocalSource::new(remote.path())),
            "",
            Vec::new(),
            dekad_template(),
            download.path(),
        );
        let summary = walker.run(dt(2004, 2, 1), dt(2004, 2, 10)).await.unwrap();
        assert_eq!(summary.downloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_files_ordered_by_date() {
        let remote = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        seed_remote(remote.path());

        let mut walker = walker(remote.path(), download.path());
        let summary = walker.run(dt(2003, 12, 1), dt(2004, 3, 31)).await.unwrap();
        let names: Vec<_> = summary
            .downloaded
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "rfe2003_12-dk3.tif",
                "rfe2004_02-dk1.tif",
                "rfe2004_02-dk2.tif",
                "rfe2004_02-dk3.tif",
                "rfe2004_03-dk1.tif",
            ]
        );
    }
}
