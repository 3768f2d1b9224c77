use crate::error::{PhotoCopyError, Result};
use crate::types::{CopyMode, DuplicatePolicy, LocationGranularity, PathCasing};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "photocopy.toml";

fn default_duplicates_format() -> String {
    "_{number}".to_string()
}

fn default_fallback() -> String {
    "Unknown".to_string()
}

fn default_replacement_char() -> char {
    '_'
}

fn default_mode() -> CopyMode {
    CopyMode::Copy
}

/// Settings for one organise run. Loaded from `photocopy.toml` and overridden
/// by command-line flags; everything that affects destination paths feeds the
/// checkpoint config hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeConfig {
    /// Destination path pattern, e.g. `/photos/{year}/{month}/{name}`.
    #[serde(default)]
    pub destination_pattern: String,

    /// Copy files, or move them out of the source tree.
    #[serde(default = "default_mode")]
    pub mode: CopyMode,

    /// What to do when two source files have identical content.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Suffix appended to the filename stem on destination collisions.
    /// Must contain `{number}`.
    #[serde(default = "default_duplicates_format")]
    pub duplicates_format: String,

    /// Casing transform applied to substituted pattern values.
    #[serde(default)]
    pub path_casing: PathCasing,

    /// Render full country names instead of ISO codes.
    #[serde(default)]
    pub use_full_country_names: bool,

    /// How precise a place the location provider should resolve.
    #[serde(default)]
    pub location_granularity: LocationGranularity,

    /// Substituted for missing location values.
    #[serde(default = "default_fallback")]
    pub unknown_location_fallback: String,

    /// Substituted for path segments that sanitise to nothing.
    #[serde(default = "default_fallback")]
    pub empty_segment_fallback: String,

    /// Replacement for characters that are invalid in path segments.
    #[serde(default = "default_replacement_char")]
    pub replacement_char: char,

    /// Skip operations whose destination already exists.
    #[serde(default)]
    pub skip_existing: bool,

    /// Overwrite existing destinations instead of renaming.
    #[serde(default)]
    pub overwrite: bool,

    /// Worker count; defaults to the CPU count.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Maximum directory depth to enumerate below the source root.
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Reject files with a resolved timestamp before this instant.
    #[serde(default)]
    pub min_date: Option<DateTime<Utc>>,

    /// Reject files with a resolved timestamp after this instant.
    #[serde(default)]
    pub max_date: Option<DateTime<Utc>>,

    /// Case-insensitive globs matched against source-relative paths.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Override for the checkpoint directory (default: `.photocopy` under
    /// the destination root).
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            destination_pattern: String::new(),
            mode: default_mode(),
            duplicate_policy: DuplicatePolicy::default(),
            duplicates_format: default_duplicates_format(),
            path_casing: PathCasing::default(),
            use_full_country_names: false,
            location_granularity: LocationGranularity::default(),
            unknown_location_fallback: default_fallback(),
            empty_segment_fallback: default_fallback(),
            replacement_char: default_replacement_char(),
            skip_existing: false,
            overwrite: false,
            concurrency: None,
            max_depth: None,
            min_date: None,
            max_date: None,
            exclude_patterns: Vec::new(),
            checkpoint_dir: None,
        }
    }
}

impl OrganizeConfig {
    /// Check the rules that do not need pattern grammar or filesystem
    /// knowledge. The core crate layers the pattern and path checks on top.
    pub fn validate_basic(&self) -> Result<()> {
        if self.destination_pattern.trim().is_empty() {
            return Err(PhotoCopyError::Config(
                "destination pattern must not be empty".to_string(),
            ));
        }

        if !self.duplicates_format.contains("{number}") {
            return Err(PhotoCopyError::Config(format!(
                "duplicates format '{}' must contain {{number}}",
                self.duplicates_format
            )));
        }

        if let (Some(min), Some(max)) = (self.min_date, self.max_date) {
            if min > max {
                return Err(PhotoCopyError::Config(format!(
                    "min date {} is after max date {}",
                    min, max
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: OrganizeConfig,
    pub path: PathBuf,
    pub exists: bool,
}

pub fn load_config() -> Result<LoadedConfig> {
    let path = resolve_config_path()?;
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| PhotoCopyError::Config(e.to_string()))?
    } else {
        OrganizeConfig::default()
    };

    Ok(LoadedConfig {
        config,
        path,
        exists,
    })
}

pub fn save_config(path: &Path, config: &OrganizeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data =
        toml::to_string_pretty(config).map_err(|e| PhotoCopyError::Config(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "photocopy-rs", "photocopy")
        .ok_or_else(|| PhotoCopyError::Config("Unable to determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_except_pattern() {
        let config = OrganizeConfig::default();
        // An empty pattern is the only invalid default.
        let err = config.validate_basic().unwrap_err();
        assert!(err.to_string().contains("destination pattern"));

        let config = OrganizeConfig {
            destination_pattern: "/photos/{name}".to_string(),
            ..OrganizeConfig::default()
        };
        config.validate_basic().unwrap();
    }

    #[test]
    fn test_duplicates_format_requires_number() {
        let config = OrganizeConfig {
            destination_pattern: "/photos/{name}".to_string(),
            duplicates_format: "_copy".to_string(),
            ..OrganizeConfig::default()
        };
        let err = config.validate_basic().unwrap_err();
        assert!(err.to_string().contains("{number}"));
    }

    #[test]
    fn test_min_date_after_max_date_rejected() {
        let config = OrganizeConfig {
            destination_pattern: "/photos/{name}".to_string(),
            min_date: Some(Utc::now()),
            max_date: Some(Utc::now() - chrono::Duration::days(1)),
            ..OrganizeConfig::default()
        };
        assert!(config.validate_basic().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = OrganizeConfig {
            destination_pattern: "/photos/{year}/{name}".to_string(),
            mode: CopyMode::Move,
            duplicate_policy: DuplicatePolicy::Skip,
            exclude_patterns: vec!["**/*.tmp".to_string()],
            ..OrganizeConfig::default()
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: OrganizeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.destination_pattern, config.destination_pattern);
        assert_eq!(parsed.mode, CopyMode::Move);
        assert_eq!(parsed.duplicate_policy, DuplicatePolicy::Skip);
        assert_eq!(parsed.exclude_patterns, config.exclude_patterns);
    }
}
