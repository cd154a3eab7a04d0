//! Source descriptors and pipeline paths.

use std::path::PathBuf;

use calendar::TemporalResolution;
use chrono::NaiveDate;
use serde::Deserialize;
use source_walker::{DirLevel, FileDateTemplate};

use crate::{Result, SyncError};

/// Transfer protocol of a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Sftp,
    Http,
    Local,
}

fn default_port() -> u16 {
    22
}

fn default_variables() -> Vec<String> {
    vec!["dataset".to_string()]
}

fn default_regions() -> Vec<String> {
    vec!["global".to_string()]
}

fn default_sp_res() -> f64 {
    0.25
}

fn default_dest_temp_res() -> TemporalResolution {
    TemporalResolution::Dekad
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("constant date")
}

/// Immutable configuration of one data source.
///
/// Created once at registration, validated by
/// [`SourceDescriptor::validate`] and never mutated afterwards. All
/// optional fields carry their defaults from deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDescriptor {
    /// Source name; also the store variable prefix and raw subdirectory.
    pub name: String,
    pub protocol: Protocol,
    /// Remote host, base URL or local root directory.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Path to the data below the host root.
    #[serde(default)]
    pub directory: String,
    /// Shape of the remote directory tree, outermost level first.
    #[serde(default)]
    pub dir_structure: Vec<DirLevel>,
    /// Byte offsets of the date fields within file names.
    pub filedate: FileDateTemplate,
    /// Native temporal resolution of the source.
    pub temp_res: TemporalResolution,
    /// Date from which the provider has data.
    #[serde(default)]
    pub begin_date: Option<NaiveDate>,
    /// Variables consumed from the source files.
    #[serde(default = "default_variables")]
    pub variables: Vec<String>,
    /// Nodata sentinel used by the provider.
    #[serde(default)]
    pub nan_value: Option<f32>,
    /// Raw value range, linearly rescaled to `valid_range`.
    #[serde(default)]
    pub data_range: Option<(f32, f32)>,
    #[serde(default)]
    pub valid_range: Option<(f32, f32)>,
    /// Substring selecting among multiple files per date.
    #[serde(default)]
    pub file_filter: Option<String>,
    /// Unit attached to the stored variables.
    #[serde(default)]
    pub unit: Option<String>,
    /// Regions the source is resampled to.
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    /// Canonical spatial resolution in degrees.
    #[serde(default = "default_sp_res")]
    pub sp_res: f64,
    /// Canonical temporal resolution of the store.
    #[serde(default = "default_dest_temp_res")]
    pub dest_temp_res: TemporalResolution,
    /// First date of the destination dataset.
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
}

impl SourceDescriptor {
    /// Validate the descriptor once, at registration time.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(SyncError::Config(format!(
                "source name {:?} is not usable as a path component",
                self.name
            )));
        }
        if self.host.is_empty() {
            return Err(SyncError::Config(format!("source {} has no host", self.name)));
        }
        if !(self.sp_res > 0.0) || self.sp_res > 180.0 {
            return Err(SyncError::Config(format!(
                "source {}: spatial resolution {} is out of range",
                self.name, self.sp_res
            )));
        }
        if self.variables.is_empty() {
            return Err(SyncError::Config(format!(
                "source {} configures no variables",
                self.name
            )));
        }
        if self.regions.is_empty() {
            return Err(SyncError::Config(format!(
                "source {} configures no regions",
                self.name
            )));
        }
        if self.protocol == Protocol::Sftp && self.username.is_none() {
            return Err(SyncError::Config(format!(
                "source {}: sftp requires a username",
                self.name
            )));
        }
        if self.data_range.is_some() != self.valid_range.is_some() {
            return Err(SyncError::Config(format!(
                "source {}: data_range and valid_range must be set together",
                self.name
            )));
        }
        for (field, span) in [("year", Some(self.filedate.year)), ("month", Some(self.filedate.month)), ("day", self.filedate.day), ("dekad", self.filedate.dekad), ("hour", self.filedate.hour), ("minute", self.filedate.minute), ("second", self.filedate.second)] {
            if let Some((start, end)) = span {
                if start >= end {
                    return Err(SyncError::Config(format!(
                        "source {}: {field} offsets {start}..{end} are empty",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// First date the destination dataset may contain: the later of the
    /// configured dataset start and the provider's earliest data.
    pub fn effective_start(&self) -> NaiveDate {
        match self.begin_date {
            Some(begin) if begin > self.start_date => begin,
            _ => self.start_date,
        }
    }

    /// Store variable name for a source variable.
    pub fn store_variable(&self, variable: &str) -> String {
        format!("{}_{}", self.name, variable)
    }
}

/// Filesystem locations used by one source's pipeline.
///
/// Threaded explicitly through the controller and its collaborators;
/// there is no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    /// Directory holding the canonical stores of all sources.
    pub data_dir: PathBuf,
    /// Raw download directory of this source.
    pub raw_dir: PathBuf,
}

impl PipelinePaths {
    /// Standard layout below a root directory: `data/` for stores and
    /// `raw/<source>/` for fetched files.
    pub fn new(root: impl Into<PathBuf>, source: &str) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("data"),
            raw_dir: root.join("raw").join(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_descriptor() -> SourceDescriptor {
        serde_yaml::from_str(
            r#"
            name: tamsat
            protocol: http
            host: "https://data.example.org/tamsat"
            dir_structure: [year, month]
            filedate:
              year: [3, 7]
              month: [8, 10]
              dekad: [13, 14]
            temp_res: dekad
            variables: [rfe]
            nan_value: 255
            data_range: [0, 255]
            valid_range: [0, 100]
            regions: [UG]
            sp_res: 0.25
            dest_temp_res: dekad
            start_date: 2004-01-01
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_and_validate() {
        let descriptor = yaml_descriptor();
        descriptor.validate().unwrap();
        assert_eq!(descriptor.port, 22);
        assert_eq!(descriptor.temp_res, TemporalResolution::Dekad);
        assert_eq!(descriptor.store_variable("rfe"), "tamsat_rfe");
    }

    #[test]
    fn test_defaults() {
        let descriptor: SourceDescriptor = serde_yaml::from_str(
            r#"
            name: lst
            protocol: local
            host: /mnt/lst
            filedate:
              year: [0, 4]
              month: [4, 6]
            temp_res: month
            "#,
        )
        .unwrap();
        descriptor.validate().unwrap();
        assert_eq!(descriptor.variables, vec!["dataset"]);
        assert_eq!(descriptor.regions, vec!["global"]);
        assert_eq!(descriptor.sp_res, 0.25);
        assert_eq!(descriptor.dest_temp_res, TemporalResolution::Dekad);
        assert_eq!(
            descriptor.start_date,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut descriptor = yaml_descriptor();
        descriptor.sp_res = 0.0;
        assert!(matches!(descriptor.validate(), Err(SyncError::Config(_))));

        let mut descriptor = yaml_descriptor();
        descriptor.valid_range = None;
        assert!(matches!(descriptor.validate(), Err(SyncError::Config(_))));

        let mut descriptor = yaml_descriptor();
        descriptor.protocol = Protocol::Sftp;
        descriptor.username = None;
        assert!(matches!(descriptor.validate(), Err(SyncError::Config(_))));

        let mut descriptor = yaml_descriptor();
        descriptor.name = "bad/name".to_string();
        assert!(matches!(descriptor.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_effective_start() {
        let mut descriptor = yaml_descriptor();
        assert_eq!(
            descriptor.effective_start(),
            NaiveDate::from_ymd_opt(2004, 1, 1).unwrap()
        );
        descriptor.begin_date = NaiveDate::from_ymd_opt(2006, 5, 1);
        assert_eq!(
            descriptor.effective_start(),
            NaiveDate::from_ymd_opt(2006, 5, 1).unwrap()
        );
        descriptor.begin_date = NaiveDate::from_ymd_opt(1999, 1, 1);
        assert_eq!(
            descriptor.effective_start(),
            NaiveDate::from_ymd_opt(2004, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_unknown_resolution_rejected_at_parse() {
        let result: std::result::Result<SourceDescriptor, _> = serde_yaml::from_str(
            r#"
            name: x
            protocol: local
            host: /mnt/x
            filedate:
              year: [0, 4]
              month: [4, 6]
            temp_res: fortnight
            "#,
        );
        assert!(result.is_err());
    }
}
