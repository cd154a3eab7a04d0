//! Source registration files.
//!
//! Each YAML file in `<config_dir>/sources/` registers one source:
//! the descriptor plus a polling schedule.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sync_pipeline::SourceDescriptor;
use tracing::{debug, info, warn};

/// One source registration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: SourceDescriptor,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Polling schedule for daemon mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between sync runs of this source.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Run a gap-filling pass after each sync.
    #[serde(default)]
    pub fill_gaps: bool,
}

fn default_poll_interval() -> u64 {
    21_600 // 6 hours
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fill_gaps: false,
        }
    }
}

impl SourceConfig {
    /// Load a source registration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: SourceConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        debug!(source = %config.source.name, path = %path.display(), "loaded source config");
        Ok(config)
    }
}

/// Load all enabled source registrations from `<config_dir>/sources/`.
pub fn load_source_configs(config_dir: &Path) -> Result<Vec<SourceConfig>> {
    let sources_dir = config_dir.join("sources");

    if !sources_dir.exists() {
        warn!(path = %sources_dir.display(), "sources config directory not found");
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();

    for entry in std::fs::read_dir(&sources_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            match SourceConfig::load(&path) {
                Ok(config) => {
                    if config.enabled {
                        info!(source = %config.source.name, "registered source");
                        configs.push(config);
                    } else {
                        debug!(source = %config.source.name, "skipping disabled source");
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load source config");
                }
            }
        }
    }

    info!(count = configs.len(), "loaded source configurations");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAMSAT: &str = r#"
source:
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
  regions: [UG, KE]
  sp_res: 0.25
  dest_temp_res: dekad
  start_date: 2004-01-01

schedule:
  poll_interval_secs: 3600
  fill_gaps: true
"#;

    #[test]
    fn test_parse_source_config() {
        let config: SourceConfig = serde_yaml::from_str(TAMSAT).unwrap();
        assert!(config.enabled);
        assert_eq!(config.source.name, "tamsat");
        assert_eq!(config.source.regions, vec!["UG", "KE"]);
        assert_eq!(config.schedule.poll_interval_secs, 3600);
        assert!(config.schedule.fill_gaps);
        config.source.validate().unwrap();
    }

    #[test]
    fn test_load_directory_skips_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(sources.join("tamsat.yaml"), TAMSAT).unwrap();
        std::fs::write(
            sources.join("off.yaml"),
            format!("{TAMSAT}\nenabled: false"),
        )
        .unwrap();
        std::fs::write(sources.join("broken.yaml"), "source: [not a map]").unwrap();

        let configs = load_source_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].source.name, "tamsat");
    }
}
