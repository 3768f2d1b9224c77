//! Bit-exact checkpoint file framing.
//!
//! A checkpoint file is a fixed 128-byte header, the source-path and
//! destination-pattern strings in UTF-8, zero padding to the next 8-byte
//! boundary, then 24-byte operation records appended for the life of the
//! session. All multi-byte integers are little-endian; the layout is
//! identical on every platform.

use chrono::{DateTime, TimeZone, Utc};
use photocopy_common::{PhotoCopyError, Result};

/// The 8 ASCII bytes `PCOPY01\0`.
pub const MAGIC: [u8; 8] = *b"PCOPY01\0";

/// Current checkpoint format version. Readers reject greater versions.
pub const FORMAT_VERSION: i32 = 1;

pub const HEADER_LEN: usize = 128;
pub const RECORD_LEN: usize = 24;

const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks between 0001-01-01 and the Unix epoch (ticks are 100 ns units).
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Convert a UTC timestamp to ticks (100 ns intervals since 0001-01-01 UTC).
pub fn ticks_from_datetime(timestamp: DateTime<Utc>) -> i64 {
    let seconds = timestamp.timestamp();
    let sub_ticks = i64::from(timestamp.timestamp_subsec_nanos()) / 100;
    seconds * TICKS_PER_SECOND + sub_ticks + UNIX_EPOCH_TICKS
}

/// Convert ticks back to a UTC timestamp. Out-of-range values clamp to the
/// Unix epoch rather than panicking on hostile input.
pub fn datetime_from_ticks(ticks: i64) -> DateTime<Utc> {
    let relative = ticks - UNIX_EPOCH_TICKS;
    let seconds = relative.div_euclid(TICKS_PER_SECOND);
    let nanos = (relative.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(seconds, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

/// Session state recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    InProgress,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            CheckpointStatus::InProgress => 0,
            CheckpointStatus::Completed => 1,
            CheckpointStatus::Failed => 2,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(CheckpointStatus::InProgress),
            1 => Some(CheckpointStatus::Completed),
            2 => Some(CheckpointStatus::Failed),
            _ => None,
        }
    }

    /// Terminal checkpoints are eligible for garbage collection and are
    /// never offered for resume.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckpointStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "InProgress",
            CheckpointStatus::Completed => "Completed",
            CheckpointStatus::Failed => "Failed",
        }
    }
}

/// Per-operation outcome tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Completed,
    /// A move whose copy landed but whose source delete failed; treated as
    /// done on resume.
    CopyDonePendingDelete,
    Skipped,
    Failed,
}

impl RecordOutcome {
    pub fn as_u8(self) -> u8 {
        match self {
            RecordOutcome::Completed => 0,
            RecordOutcome::CopyDonePendingDelete => 1,
            RecordOutcome::Skipped => 2,
            RecordOutcome::Failed => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordOutcome::Completed),
            1 => Some(RecordOutcome::CopyDonePendingDelete),
            2 => Some(RecordOutcome::Skipped),
            3 => Some(RecordOutcome::Failed),
            _ => None,
        }
    }

    /// Both `Completed` and `CopyDonePendingDelete` count as completed work.
    pub fn counts_as_completed(self) -> bool {
        matches!(
            self,
            RecordOutcome::Completed | RecordOutcome::CopyDonePendingDelete
        )
    }
}

/// The fixed 128-byte header at the start of every checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub version: i32,
    pub status: CheckpointStatus,
    pub start_ticks: i64,
    pub last_update_ticks: i64,
    pub total_files: i32,
    pub total_bytes: i64,
    pub completed_count: i32,
    pub completed_bytes: i64,
    pub config_hash: [u8; 16],
    pub plan_hash: [u8; 16],
    pub source_len: i32,
    pub pattern_len: i32,
    pub records_offset: i32,
}

impl CheckpointHeader {
    /// Serialise into a 128-byte buffer. Reserved fields are written zero.
    pub fn write_to(&self, buf: &mut [u8; HEADER_LEN]) {
        buf.fill(0);
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.status.as_i32().to_le_bytes());
        buf[16..24].copy_from_slice(&self.start_ticks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_update_ticks.to_le_bytes());
        buf[32..36].copy_from_slice(&self.total_files.to_le_bytes());
        // 36..40 reserved
        buf[40..48].copy_from_slice(&self.total_bytes.to_le_bytes());
        buf[48..52].copy_from_slice(&self.completed_count.to_le_bytes());
        // 52..56 reserved
        buf[56..64].copy_from_slice(&self.completed_bytes.to_le_bytes());
        buf[64..80].copy_from_slice(&self.config_hash);
        buf[80..96].copy_from_slice(&self.plan_hash);
        buf[96..100].copy_from_slice(&self.source_len.to_le_bytes());
        buf[100..104].copy_from_slice(&self.pattern_len.to_le_bytes());
        buf[104..108].copy_from_slice(&self.records_offset.to_le_bytes());
        // 108..128 reserved
    }

    /// Parse and validate a header. Anything that fails the checks is
    /// reported as `CheckpointCorrupt`; callers decide whether that is fatal
    /// or just "no checkpoint".
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(PhotoCopyError::CheckpointCorrupt(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0..8] != MAGIC {
            return Err(PhotoCopyError::CheckpointCorrupt(
                "bad magic bytes".to_string(),
            ));
        }

        let version = read_i32(buf, 8);
        if version > FORMAT_VERSION {
            return Err(PhotoCopyError::CheckpointCorrupt(format!(
                "unsupported version {}",
                version
            )));
        }

        let status = CheckpointStatus::from_i32(read_i32(buf, 12)).ok_or_else(|| {
            PhotoCopyError::CheckpointCorrupt(format!("invalid status {}", read_i32(buf, 12)))
        })?;

        let source_len = read_i32(buf, 96);
        let pattern_len = read_i32(buf, 100);
        let records_offset = read_i32(buf, 104);
        if source_len < 0 || pattern_len < 0 {
            return Err(PhotoCopyError::CheckpointCorrupt(
                "negative string length".to_string(),
            ));
        }
        let min_offset = HEADER_LEN as i64 + i64::from(source_len) + i64::from(pattern_len);
        if i64::from(records_offset) < min_offset || records_offset % 8 != 0 {
            return Err(PhotoCopyError::CheckpointCorrupt(format!(
                "invalid records offset {}",
                records_offset
            )));
        }

        Ok(Self {
            version,
            status,
            start_ticks: read_i64(buf, 16),
            last_update_ticks: read_i64(buf, 24),
            total_files: read_i32(buf, 32),
            total_bytes: read_i64(buf, 40),
            completed_count: read_i32(buf, 48),
            completed_bytes: read_i64(buf, 56),
            config_hash: read_hash(buf, 64),
            plan_hash: read_hash(buf, 80),
            source_len,
            pattern_len,
            records_offset,
        })
    }
}

/// One appended operation record: plan index, outcome tag, three zero
/// padding bytes, file size, UTC-ticks timestamp. Fixed 24 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRecord {
    pub plan_index: i32,
    pub outcome: RecordOutcome,
    pub file_size: i64,
    pub timestamp_ticks: i64,
}

impl OperationRecord {
    pub fn write_to(&self, buf: &mut [u8; RECORD_LEN]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&self.plan_index.to_le_bytes());
        buf[4] = self.outcome.as_u8();
        // 5..8 padding stays zero
        buf[8..16].copy_from_slice(&self.file_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp_ticks.to_le_bytes());
    }

    /// Interpret a 24-byte span. Padding bytes are ignored; an unknown
    /// outcome tag means the span is not a record.
    pub fn read_from(buf: &[u8; RECORD_LEN]) -> Result<Self> {
        let outcome = RecordOutcome::from_u8(buf[4]).ok_or_else(|| {
            PhotoCopyError::CheckpointCorrupt(format!("unknown outcome tag {}", buf[4]))
        })?;
        Ok(Self {
            plan_index: read_i32(buf, 0),
            outcome,
            file_size: read_i64(buf, 8),
            timestamp_ticks: read_i64(buf, 16),
        })
    }
}

/// Where records begin for the given string lengths: the header plus both
/// strings, rounded up to the next multiple of 8.
pub fn records_offset_for(source_len: usize, pattern_len: usize) -> i32 {
    let unaligned = HEADER_LEN + source_len + pattern_len;
    (unaligned.div_ceil(8) * 8) as i32
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(bytes)
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

fn read_hash(buf: &[u8], offset: usize) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&buf[offset..offset + 16]);
    bytes
}
