//! Locating, creating, loading and garbage-collecting checkpoint files.

use super::format::{
    datetime_from_ticks, records_offset_for, ticks_from_datetime, CheckpointHeader,
    CheckpointStatus, OperationRecord, HEADER_LEN, RECORD_LEN,
};
use super::validate::same_source_dir;
use super::writer::CheckpointWriter;
use super::{CheckpointState, CheckpointStats, CompletionBitmap};
use crate::path_safety;
use chrono::{DateTime, Duration, Utc};
use photocopy_common::{PhotoCopyError, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CHECKPOINT_DIR_NAME: &str = ".photocopy";
const FILE_PREFIX: &str = "photocopy-";
const FILE_SUFFIX: &str = ".checkpoint";

/// Placeholder for failures loaded from disk; records carry no message.
const LOADED_FAILURE_MESSAGE: &str = "failed in a previous run";

/// Lightweight listing entry for diagnostics and cleanup.
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    pub status: CheckpointStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_files: u32,
    pub completed: u32,
}

/// Manages the checkpoint files for one destination root.
pub struct CheckpointStore {
    directory: PathBuf,
}

impl CheckpointStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    /// The checkpoint directory for a destination pattern: `.photocopy`
    /// under the extracted destination root, unless overridden.
    pub fn for_pattern(destination_pattern: &str, override_dir: Option<&Path>) -> Result<Self> {
        let directory = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                path_safety::extract_destination_root(destination_pattern)?.join(CHECKPOINT_DIR_NAME)
            }
        };
        Ok(Self::new(directory))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn checkpoint_path(&self, session_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}{}", FILE_PREFIX, session_id, FILE_SUFFIX))
    }

    /// The most recent in-progress checkpoint matching the current source
    /// directory and destination pattern, if any. Corrupt files are
    /// silently skipped and left in place.
    pub fn find_latest(
        &self,
        source_dir: &str,
        destination_pattern: &str,
    ) -> Result<Option<CheckpointState>> {
        let mut best: Option<CheckpointState> = None;

        for path in self.checkpoint_files()? {
            let state = match Self::load(&path) {
                Ok(Some(state)) => state,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping unreadable checkpoint {:?}: {}", path, e);
                    continue;
                }
            };

            if state.status != CheckpointStatus::InProgress {
                continue;
            }
            if !same_source_dir(&state.source_dir, source_dir) {
                continue;
            }
            let stored = state.destination_pattern.trim_end_matches(['/', '\\']);
            let current = destination_pattern.trim_end_matches(['/', '\\']);
            if stored != current {
                continue;
            }

            match &best {
                Some(current_best) if current_best.started_at >= state.started_at => {}
                _ => best = Some(state),
            }
        }

        Ok(best)
    }

    /// Fully load one checkpoint file: header, strings, every whole record.
    /// Returns `None` for anything that is not a well-formed checkpoint; a
    /// torn record tail is discarded, not an error.
    pub fn load(path: &Path) -> Result<Option<CheckpointState>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };
        let mut reader = BufReader::new(file);

        let mut header_buf = [0u8; HEADER_LEN];
        if reader.read_exact(&mut header_buf).is_err() {
            return Ok(None);
        }
        let header = match CheckpointHeader::read_from(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                debug!("Invalid checkpoint header in {:?}: {}", path, e);
                return Ok(None);
            }
        };

        let source_dir = match read_utf8(&mut reader, header.source_len as usize) {
            Some(text) => text,
            None => return Ok(None),
        };
        let destination_pattern = match read_utf8(&mut reader, header.pattern_len as usize) {
            Some(text) => text,
            None => return Ok(None),
        };

        reader.seek(SeekFrom::Start(header.records_offset as u64))?;

        let total = header.total_files.max(0) as u32;
        let mut bitmap = CompletionBitmap::new(total);
        let mut failures = HashMap::new();
        let mut stats = CheckpointStats::empty(datetime_from_ticks(header.last_update_ticks));
        let mut latest_ticks = header.last_update_ticks;

        let mut record_buf = [0u8; RECORD_LEN];
        loop {
            if reader.read_exact(&mut record_buf).is_err() {
                // EOF, or a torn trailing partial record; either way we stop.
                break;
            }
            let record = match OperationRecord::read_from(&record_buf) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Discarding corrupt record tail in {:?}: {}", path, e);
                    break;
                }
            };
            if record.plan_index < 0 || record.plan_index as u32 >= total {
                warn!(
                    "Discarding out-of-range record tail in {:?} (index {})",
                    path, record.plan_index
                );
                break;
            }

            let index = record.plan_index as u32;
            bitmap.set(index);
            if record.outcome.counts_as_completed() {
                stats.completed += 1;
                stats.bytes_completed += record.file_size.max(0) as u64;
            } else if record.outcome == super::format::RecordOutcome::Skipped {
                stats.skipped += 1;
            } else {
                stats.failed += 1;
                failures.insert(index, LOADED_FAILURE_MESSAGE.to_string());
            }
            latest_ticks = latest_ticks.max(record.timestamp_ticks);
        }

        stats.last_updated = datetime_from_ticks(latest_ticks);

        Ok(Some(CheckpointState {
            session_id: session_id_from_path(path),
            version: header.version,
            status: header.status,
            started_at: datetime_from_ticks(header.start_ticks),
            source_dir,
            destination_pattern,
            config_hash: header.config_hash,
            plan_hash: header.plan_hash,
            total_files: total,
            total_bytes: header.total_bytes.max(0) as u64,
            bitmap,
            failures,
            stats,
            file_path: Some(path.to_path_buf()),
        }))
    }

    /// Create the checkpoint file for a fresh session and hand back its
    /// writer. The file is created exclusively; the header, both strings
    /// and the alignment padding are durably on disk before this returns.
    pub fn create_writer(&self, state: &mut CheckpointState) -> Result<CheckpointWriter> {
        fs::create_dir_all(&self.directory)?;

        let path = self.checkpoint_path(&state.session_id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let records_offset =
            records_offset_for(state.source_dir.len(), state.destination_pattern.len());
        let mut prefix = vec![0u8; records_offset as usize];

        let header = CheckpointHeader {
            version: state.version,
            status: CheckpointStatus::InProgress,
            start_ticks: ticks_from_datetime(state.started_at),
            last_update_ticks: ticks_from_datetime(state.stats.last_updated),
            total_files: state.total_files as i32,
            total_bytes: state.total_bytes as i64,
            completed_count: state.stats.completed as i32,
            completed_bytes: state.stats.bytes_completed as i64,
            config_hash: state.config_hash,
            plan_hash: state.plan_hash,
            source_len: state.source_dir.len() as i32,
            pattern_len: state.destination_pattern.len() as i32,
            records_offset,
        };
        let mut header_buf = [0u8; HEADER_LEN];
        header.write_to(&mut header_buf);
        prefix[..HEADER_LEN].copy_from_slice(&header_buf);

        let source_end = HEADER_LEN + state.source_dir.len();
        prefix[HEADER_LEN..source_end].copy_from_slice(state.source_dir.as_bytes());
        let pattern_end = source_end + state.destination_pattern.len();
        prefix[source_end..pattern_end].copy_from_slice(state.destination_pattern.as_bytes());
        // Remaining bytes up to records_offset stay zero.

        file.write_all(&prefix)?;
        // A crash after this point must still leave a well-formed header.
        file.sync_all()?;

        state.file_path = Some(path.clone());
        state.status = CheckpointStatus::InProgress;
        debug!("Created checkpoint {:?}", path);

        Ok(CheckpointWriter::spawn(file, state))
    }

    /// Reopen an in-progress checkpoint for appending. Any torn trailing
    /// partial record is truncated away first so the records section stays
    /// a whole multiple of the record size.
    pub fn resume_writer(&self, state: &CheckpointState) -> Result<CheckpointWriter> {
        let path = state.file_path.clone().ok_or_else(|| {
            PhotoCopyError::Checkpoint("checkpoint state has no backing file".to_string())
        })?;

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_buf = [0u8; HEADER_LEN];
        file.read_exact(&mut header_buf)?;
        let header = CheckpointHeader::read_from(&header_buf)?;
        if header.status.is_terminal() {
            return Err(PhotoCopyError::Checkpoint(format!(
                "checkpoint {:?} is already {}",
                path,
                header.status.as_str()
            )));
        }

        let length = file.metadata()?.len();
        let records_offset = header.records_offset as u64;
        if length < records_offset {
            return Err(PhotoCopyError::CheckpointCorrupt(format!(
                "checkpoint {:?} shorter than its records offset",
                path
            )));
        }
        let whole_records_end =
            records_offset + ((length - records_offset) / RECORD_LEN as u64) * RECORD_LEN as u64;
        if whole_records_end != length {
            warn!(
                "Truncating torn record tail in {:?} ({} -> {} bytes)",
                path, length, whole_records_end
            );
            file.set_len(whole_records_end)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(CheckpointWriter::spawn(file, state))
    }

    /// Remove one checkpoint file.
    pub fn delete(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Delete terminal checkpoints whose last update is older than
    /// `max_age`. In-progress files are never deleted. Returns the number
    /// removed.
    pub fn cleanup(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for summary in self.list_all()? {
            if !summary.status.is_terminal() {
                continue;
            }
            if now.signed_duration_since(summary.last_updated) <= max_age {
                continue;
            }
            match fs::remove_file(&summary.path) {
                Ok(()) => {
                    debug!("Removed old checkpoint {:?}", summary.path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove checkpoint {:?}: {}", summary.path, e),
            }
        }
        Ok(removed)
    }

    /// Every parseable checkpoint in the directory, as summaries.
    pub fn list_all(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries = Vec::new();
        for path in self.checkpoint_files()? {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(_) => continue,
            };
            let mut reader = BufReader::new(file);
            let mut header_buf = [0u8; HEADER_LEN];
            if reader.read_exact(&mut header_buf).is_err() {
                continue;
            }
            let header = match CheckpointHeader::read_from(&header_buf) {
                Ok(header) => header,
                Err(_) => continue,
            };
            summaries.push(CheckpointSummary {
                path,
                status: header.status,
                started_at: datetime_from_ticks(header.start_ticks),
                last_updated: datetime_from_ticks(header.last_update_ticks),
                total_files: header.total_files.max(0) as u32,
                completed: header.completed_count.max(0) as u32,
            });
        }
        Ok(summaries)
    }

    fn checkpoint_files(&self) -> Result<Vec<PathBuf>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if path.is_file() && name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn read_utf8(reader: &mut impl Read, len: usize) -> Option<String> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn session_id_from_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(FILE_PREFIX))
        .and_then(|n| n.strip_suffix(FILE_SUFFIX))
        .unwrap_or("unknown")
        .to_string()
}
