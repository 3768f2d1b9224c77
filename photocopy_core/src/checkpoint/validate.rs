//! Config and plan hashing, and the decision whether a stored checkpoint is
//! still resumable under the current configuration.

use super::CheckpointState;
use chrono::{DateTime, Utc};
use photocopy_common::{OrganizeConfig, Sha256Hash, SourceFile};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const STALE_AFTER_DAYS: i64 = 30;

/// Length-prefixed string append: 4-byte LE length then UTF-8 bytes. A null
/// value is a single 0x00 byte, which keeps it distinct from an empty
/// string (whose length prefix is four zero bytes).
fn append_string(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        None => hasher.update([0u8]),
        Some(text) => {
            hasher.update((text.len() as u32).to_le_bytes());
            hasher.update(text.as_bytes());
        }
    }
}

/// Deterministic hash over every configuration field that affects
/// destination paths.
pub fn config_hash(config: &OrganizeConfig) -> Sha256Hash {
    let mut hasher = Sha256::new();
    append_string(&mut hasher, Some(&config.destination_pattern));
    append_string(&mut hasher, Some(config.mode.as_str()));
    append_string(&mut hasher, Some(&config.duplicates_format));
    append_string(&mut hasher, Some(config.path_casing.as_str()));
    hasher.update([u8::from(config.use_full_country_names)]);
    append_string(&mut hasher, Some(config.location_granularity.as_str()));
    append_string(&mut hasher, Some(&config.unknown_location_fallback));
    Sha256Hash(hasher.finalize().into())
}

/// Deterministic hash over the source file set: full path (length-prefixed)
/// and size (8-byte LE) per file, sorted by full path case-insensitively.
/// Input order does not matter.
pub fn plan_hash(files: &[Arc<SourceFile>]) -> Sha256Hash {
    let mut entries: Vec<(String, u64)> = files
        .iter()
        .map(|f| (f.path.to_string_lossy().into_owned(), f.size))
        .collect();
    entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    let mut hasher = Sha256::new();
    for (path, size) in &entries {
        append_string(&mut hasher, Some(path));
        hasher.update(size.to_le_bytes());
    }
    Sha256Hash(hasher.finalize().into())
}

/// Whether a stored checkpoint may be resumed, and with what caveats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeValidation {
    Valid {
        total: u32,
        completed: u32,
        warnings: Vec<String>,
    },
    Invalid {
        reason: String,
    },
}

impl ResumeValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, ResumeValidation::Valid { .. })
    }
}

fn trim_trailing_separators(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
}

/// Source-path equality follows the platform: case-insensitive on Windows,
/// case-sensitive elsewhere. Trailing separators never matter.
pub fn same_source_dir(stored: &str, current: &str) -> bool {
    let stored = trim_trailing_separators(stored);
    let current = trim_trailing_separators(current);
    #[cfg(windows)]
    {
        stored.eq_ignore_ascii_case(current)
    }
    #[cfg(not(windows))]
    {
        stored == current
    }
}

/// Decide whether `state` is resumable under `config` for `source_dir`.
pub fn validate(
    state: &CheckpointState,
    config: &OrganizeConfig,
    source_dir: &str,
    now: DateTime<Utc>,
) -> ResumeValidation {
    if !same_source_dir(&state.source_dir, source_dir) {
        return ResumeValidation::Invalid {
            reason: format!(
                "Source directory has changed: checkpoint was for '{}'",
                state.source_dir
            ),
        };
    }

    // Destination patterns compare case-sensitively on every platform.
    if trim_trailing_separators(&state.destination_pattern)
        != trim_trailing_separators(&config.destination_pattern)
    {
        return ResumeValidation::Invalid {
            reason: "Configuration has changed: destination pattern differs".to_string(),
        };
    }

    if config_hash(config).prefix() != state.config_hash {
        return ResumeValidation::Invalid {
            reason: "Configuration has changed: organise options differ".to_string(),
        };
    }

    if state.stats.completed >= state.total_files {
        return ResumeValidation::Invalid {
            reason: format!(
                "Checkpoint has nothing left to resume ({} of {} completed)",
                state.stats.completed, state.total_files
            ),
        };
    }

    let mut warnings = Vec::new();
    let age = now.signed_duration_since(state.started_at);
    if age.num_days() > STALE_AFTER_DAYS {
        warnings.push(format!(
            "checkpoint is {} days old; the source tree may have drifted",
            age.num_days()
        ));
    }

    ResumeValidation::Valid {
        total: state.total_files,
        completed: state.stats.completed,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::format::{CheckpointStatus, FORMAT_VERSION};
    use crate::checkpoint::{CheckpointStats, CompletionBitmap};
    use chrono::Duration;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn base_config() -> OrganizeConfig {
        OrganizeConfig {
            destination_pattern: "/dest/{name}".to_string(),
            ..OrganizeConfig::default()
        }
    }

    fn state_for(config: &OrganizeConfig, total: u32, completed: u32) -> CheckpointState {
        let now = Utc::now();
        CheckpointState {
            session_id: "s".to_string(),
            version: FORMAT_VERSION,
            status: CheckpointStatus::InProgress,
            started_at: now,
            source_dir: "/src".to_string(),
            destination_pattern: config.destination_pattern.clone(),
            config_hash: config_hash(config).prefix(),
            plan_hash: [0; 16],
            total_files: total,
            total_bytes: 100,
            bitmap: CompletionBitmap::new(total),
            failures: HashMap::new(),
            stats: CheckpointStats {
                completed,
                ..CheckpointStats::empty(now)
            },
            file_path: None,
        }
    }

    fn file(path: &str, size: u64) -> Arc<SourceFile> {
        Arc::new(SourceFile::new(PathBuf::from(path), size, Utc::now()))
    }

    #[test]
    fn test_config_hash_is_deterministic() {
        let config = base_config();
        assert_eq!(config_hash(&config).0, config_hash(&config).0);
    }

    #[test]
    fn test_config_hash_changes_with_pattern() {
        let a = base_config();
        let b = OrganizeConfig {
            destination_pattern: "/dest/{year}/{name}".to_string(),
            ..base_config()
        };
        assert_ne!(config_hash(&a).0, config_hash(&b).0);
    }

    #[test]
    fn test_config_hash_changes_with_mode() {
        let a = base_config();
        let b = OrganizeConfig {
            mode: photocopy_common::CopyMode::Move,
            ..base_config()
        };
        assert_ne!(config_hash(&a).0, config_hash(&b).0);
    }

    #[test]
    fn test_null_encoding_distinct_from_empty() {
        let mut null_hasher = Sha256::new();
        append_string(&mut null_hasher, None);
        let mut empty_hasher = Sha256::new();
        append_string(&mut empty_hasher, Some(""));

        let null_digest: [u8; 32] = null_hasher.finalize().into();
        let empty_digest: [u8; 32] = empty_hasher.finalize().into();
        assert_ne!(null_digest, empty_digest);
    }

    #[test]
    fn test_plan_hash_insensitive_to_input_order() {
        let a = file("/src/b.jpg", 2);
        let b = file("/src/A.jpg", 1);
        let c = file("/src/c.jpg", 3);

        let forward = plan_hash(&[Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);
        let shuffled = plan_hash(&[c, a, b]);
        assert_eq!(forward.0, shuffled.0);
    }

    #[test]
    fn test_plan_hash_changes_with_size() {
        let before = plan_hash(&[file("/src/a.jpg", 1)]);
        let after = plan_hash(&[file("/src/a.jpg", 2)]);
        assert_ne!(before.0, after.0);
    }

    #[test]
    fn test_validate_accepts_matching_config() {
        let config = base_config();
        let state = state_for(&config, 10, 4);
        let result = validate(&state, &config, "/src", Utc::now());
        assert_eq!(
            result,
            ResumeValidation::Valid {
                total: 10,
                completed: 4,
                warnings: vec![]
            }
        );
    }

    #[test]
    fn test_validate_trailing_separator_normalised() {
        let config = base_config();
        let state = state_for(&config, 10, 4);
        assert!(validate(&state, &config, "/src/", Utc::now()).is_valid());
    }

    #[test]
    fn test_validate_rejects_changed_source() {
        let config = base_config();
        let state = state_for(&config, 10, 4);
        let result = validate(&state, &config, "/other", Utc::now());
        match result {
            ResumeValidation::Invalid { reason } => {
                assert!(reason.contains("Source directory has changed"))
            }
            _ => panic!("expected invalid"),
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_source_comparison_case_sensitive_on_unix() {
        assert!(!same_source_dir("/src", "/SRC"));
    }

    #[test]
    fn test_validate_rejects_changed_pattern() {
        let config = base_config();
        let state = state_for(&config, 10, 4);
        let changed = OrganizeConfig {
            destination_pattern: "/dest/{year}/{name}".to_string(),
            ..base_config()
        };
        let result = validate(&state, &changed, "/src", Utc::now());
        match result {
            ResumeValidation::Invalid { reason } => {
                assert!(reason.contains("Configuration has changed"))
            }
            _ => panic!("expected invalid"),
        }
    }

    #[test]
    fn test_validate_rejects_changed_options() {
        let config = base_config();
        let state = state_for(&config, 10, 4);
        let changed = OrganizeConfig {
            unknown_location_fallback: "Elsewhere".to_string(),
            ..base_config()
        };
        let result = validate(&state, &changed, "/src", Utc::now());
        match result {
            ResumeValidation::Invalid { reason } => {
                assert!(reason.contains("Configuration has changed"))
            }
            _ => panic!("expected invalid"),
        }
    }

    #[test]
    fn test_validate_rejects_fully_completed_checkpoint() {
        let config = base_config();
        let state = state_for(&config, 10, 10);
        assert!(!validate(&state, &config, "/src", Utc::now()).is_valid());
    }

    #[test]
    fn test_validate_warns_about_old_checkpoint() {
        let config = base_config();
        let mut state = state_for(&config, 10, 4);
        state.started_at = Utc::now() - Duration::days(45);

        match validate(&state, &config, "/src", Utc::now()) {
            ResumeValidation::Valid { warnings, .. } => {
                assert_eq!(warnings.len(), 1);
                assert!(warnings[0].contains("days old"));
            }
            _ => panic!("expected valid with warnings"),
        }
    }
}
