//! The checkpoint hot path: lock-free completion tracking plus a batched
//! append writer.
//!
//! Worker tasks call [`CheckpointWriter::record`] concurrently; each call
//! sets a bit, bumps the statistics and enqueues a 24-byte record onto a
//! bounded channel. A single background thread drains the channel in
//! batches and is the only writer of record bytes. Batches are whole
//! multiples of the record size and issued as one write, so the on-disk
//! records section is always a prefix of the records submitted so far.

use super::format::{
    ticks_from_datetime, CheckpointHeader, CheckpointStatus, OperationRecord, RecordOutcome,
    HEADER_LEN, RECORD_LEN,
};
use super::{CheckpointState, CheckpointStats};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use photocopy_common::{PhotoCopyError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Backpressure boundary: callers block once this many records are queued.
const QUEUE_CAPACITY: usize = 10_000;
/// Up to ~4KB of records per append.
const BATCH_RECORDS: usize = 170;
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Append(OperationRecord),
    Flush {
        status: CheckpointStatus,
        ack: Sender<Result<()>>,
    },
}

/// State shared between callers and the background thread. The bitmap and
/// counters are atomics; the error map is behind a lock.
struct Shared {
    total: u32,
    bitmap: Vec<AtomicU64>,
    completed: AtomicU32,
    failed: AtomicU32,
    skipped: AtomicU32,
    bytes_completed: AtomicU64,
    last_updated_ticks: AtomicI64,
    errors: RwLock<HashMap<u32, String>>,
}

impl Shared {
    fn from_state(state: &CheckpointState) -> Self {
        let bitmap = state
            .bitmap
            .words()
            .iter()
            .map(|w| AtomicU64::new(*w))
            .collect();
        Self {
            total: state.total_files,
            bitmap,
            completed: AtomicU32::new(state.stats.completed),
            failed: AtomicU32::new(state.stats.failed),
            skipped: AtomicU32::new(state.stats.skipped),
            bytes_completed: AtomicU64::new(state.stats.bytes_completed),
            last_updated_ticks: AtomicI64::new(ticks_from_datetime(state.stats.last_updated)),
            errors: RwLock::new(state.failures.clone()),
        }
    }

    fn set_bit(&self, index: u32) {
        self.bitmap[(index / 64) as usize].fetch_or(1u64 << (index % 64), Ordering::SeqCst);
    }

    fn get_bit(&self, index: u32) -> bool {
        if index >= self.total {
            return false;
        }
        self.bitmap[(index / 64) as usize].load(Ordering::SeqCst) & (1u64 << (index % 64)) != 0
    }

    fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            bytes_completed: self.bytes_completed.load(Ordering::SeqCst),
            last_updated: super::format::datetime_from_ticks(
                self.last_updated_ticks.load(Ordering::SeqCst),
            ),
        }
    }
}

/// Static header fields, fixed at writer creation.
struct HeaderTemplate {
    version: i32,
    start_ticks: i64,
    total_files: i32,
    total_bytes: i64,
    config_hash: [u8; 16],
    plan_hash: [u8; 16],
    source_len: i32,
    pattern_len: i32,
    records_offset: i32,
}

impl HeaderTemplate {
    fn from_state(state: &CheckpointState) -> Self {
        Self {
            version: state.version,
            start_ticks: ticks_from_datetime(state.started_at),
            total_files: state.total_files as i32,
            total_bytes: state.total_bytes as i64,
            config_hash: state.config_hash,
            plan_hash: state.plan_hash,
            source_len: state.source_dir.len() as i32,
            pattern_len: state.destination_pattern.len() as i32,
            records_offset: super::format::records_offset_for(
                state.source_dir.len(),
                state.destination_pattern.len(),
            ),
        }
    }
}

/// Appends operation records for one session. Created by the store; owns
/// the open checkpoint file through its background thread.
pub struct CheckpointWriter {
    shared: Arc<Shared>,
    tx: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
    terminal: AtomicBool,
}

impl CheckpointWriter {
    /// Spawn the background append thread over an already positioned file
    /// handle. The file cursor must sit at the current end of the records
    /// section.
    pub(crate) fn spawn(file: File, state: &CheckpointState) -> Self {
        let shared = Arc::new(Shared::from_state(state));
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let (done_tx, done_rx) = bounded(1);

        let task = WriterTask {
            file,
            shared: Arc::clone(&shared),
            rx,
            template: HeaderTemplate::from_state(state),
            status: state.status,
            deferred_error: None,
        };
        let handle = std::thread::Builder::new()
            .name("checkpoint-writer".to_string())
            .spawn(move || {
                task.run();
                let _ = done_tx.send(());
            })
            .expect("failed to spawn checkpoint writer thread");

        Self {
            shared,
            tx: Some(tx),
            handle: Some(handle),
            done_rx,
            terminal: AtomicBool::new(false),
        }
    }

    pub fn total(&self) -> u32 {
        self.shared.total
    }

    /// Thread-safe bitmap read; the executor's resume fast path.
    pub fn is_completed(&self, index: u32) -> bool {
        self.shared.get_bit(index)
    }

    /// Record a non-failure outcome for a plan index. Blocks only when the
    /// record queue is full.
    pub fn record(&self, index: u32, outcome: RecordOutcome, file_size: u64) -> Result<()> {
        self.submit(index, outcome, file_size, None)
    }

    /// Record a failed operation together with its message.
    pub fn record_failure(&self, index: u32, file_size: u64, message: String) -> Result<()> {
        self.submit(index, RecordOutcome::Failed, file_size, Some(message))
    }

    fn submit(
        &self,
        index: u32,
        outcome: RecordOutcome,
        file_size: u64,
        message: Option<String>,
    ) -> Result<()> {
        assert!(
            index < self.shared.total,
            "plan index {} out of range (total {})",
            index,
            self.shared.total
        );
        if self.terminal.load(Ordering::SeqCst) {
            return Err(PhotoCopyError::Checkpoint(
                "writer already reached a terminal state".to_string(),
            ));
        }

        self.shared.set_bit(index);
        match outcome {
            RecordOutcome::Completed | RecordOutcome::CopyDonePendingDelete => {
                self.shared.completed.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .bytes_completed
                    .fetch_add(file_size, Ordering::SeqCst);
            }
            RecordOutcome::Skipped => {
                self.shared.skipped.fetch_add(1, Ordering::SeqCst);
            }
            RecordOutcome::Failed => {
                self.shared.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let now_ticks = ticks_from_datetime(Utc::now());
        self.shared
            .last_updated_ticks
            .fetch_max(now_ticks, Ordering::SeqCst);

        if let Some(message) = message {
            if let Ok(mut errors) = self.shared.errors.write() {
                errors.insert(index, message);
            }
        }

        let record = OperationRecord {
            plan_index: index as i32,
            outcome,
            file_size: file_size as i64,
            timestamp_ticks: now_ticks,
        };
        self.send(Command::Append(record))
    }

    /// Drain the queue, fsync the records, rewrite the header with current
    /// statistics and fsync again. The file is a durable intermediate state
    /// when this returns.
    pub fn flush(&self) -> Result<()> {
        self.control(CheckpointStatus::InProgress, false)
    }

    /// As `flush`, but stamp the terminal `Completed` status. Idempotent.
    pub fn complete(&self) -> Result<()> {
        self.control(CheckpointStatus::Completed, true)
    }

    /// As `flush`, but stamp the terminal `Failed` status. Idempotent.
    pub fn fail(&self, message: &str) -> Result<()> {
        tracing::warn!("Checkpoint session failed: {}", message);
        self.control(CheckpointStatus::Failed, true)
    }

    /// Statistics snapshot for progress reporting.
    pub fn stats(&self) -> CheckpointStats {
        self.shared.stats()
    }

    /// Number of records accepted so far (all outcomes).
    pub fn records_recorded(&self) -> u64 {
        let stats = self.shared.stats();
        u64::from(stats.completed) + u64::from(stats.failed) + u64::from(stats.skipped)
    }

    /// Copy of the per-index failure messages.
    pub fn failures(&self) -> HashMap<u32, String> {
        self.shared
            .errors
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn control(&self, status: CheckpointStatus, terminal: bool) -> Result<()> {
        let now_ticks = ticks_from_datetime(Utc::now());
        self.shared
            .last_updated_ticks
            .fetch_max(now_ticks, Ordering::SeqCst);

        let (ack_tx, ack_rx) = bounded(1);
        self.send(Command::Flush {
            status,
            ack: ack_tx,
        })?;
        let result = ack_rx.recv().map_err(|_| {
            PhotoCopyError::Checkpoint("checkpoint writer thread terminated".to_string())
        })?;
        if terminal && result.is_ok() {
            self.terminal.store(true, Ordering::SeqCst);
        }
        result
    }

    fn send(&self, command: Command) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            PhotoCopyError::Checkpoint("checkpoint writer already disposed".to_string())
        })?;
        tx.send(command).map_err(|_| {
            PhotoCopyError::Checkpoint("checkpoint writer thread terminated".to_string())
        })
    }
}

impl Drop for CheckpointWriter {
    /// Close the queue, then wait up to five seconds for the background
    /// thread to drain and leave a well-formed file. On timeout the thread
    /// is left to finish detached; records already written stay durable.
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            match self.done_rx.recv_timeout(DISPOSE_TIMEOUT) {
                Ok(()) => {
                    let _ = handle.join();
                }
                Err(_) => {
                    tracing::warn!("checkpoint writer did not drain within {:?}", DISPOSE_TIMEOUT);
                }
            }
        }
    }
}

/// The background thread: sole writer of record bytes.
struct WriterTask {
    file: File,
    shared: Arc<Shared>,
    rx: Receiver<Command>,
    template: HeaderTemplate,
    status: CheckpointStatus,
    deferred_error: Option<std::io::Error>,
}

impl WriterTask {
    fn run(mut self) {
        let mut batch: Vec<u8> = Vec::with_capacity(BATCH_RECORDS * RECORD_LEN);

        while let Ok(command) = self.rx.recv() {
            match command {
                Command::Append(record) => {
                    push_record(&mut batch, &record);
                    let mut interrupted_by = None;
                    while batch.len() < BATCH_RECORDS * RECORD_LEN {
                        match self.rx.try_recv() {
                            Ok(Command::Append(record)) => push_record(&mut batch, &record),
                            Ok(Command::Flush { status, ack }) => {
                                interrupted_by = Some((status, ack));
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    self.write_batch(&mut batch);
                    if let Some((status, ack)) = interrupted_by {
                        let result = self.flush_with_header(status);
                        let _ = ack.send(result);
                    }
                }
                Command::Flush { status, ack } => {
                    self.write_batch(&mut batch);
                    let result = self.flush_with_header(status);
                    let _ = ack.send(result);
                }
            }
        }

        // Channel closed: drain what is buffered and leave a well-formed
        // file carrying the last status we were told about.
        self.write_batch(&mut batch);
        if let Err(e) = self.flush_with_header(self.status) {
            tracing::error!("final checkpoint flush failed: {}", e);
        }
    }

    fn write_batch(&mut self, batch: &mut Vec<u8>) {
        if batch.is_empty() || self.deferred_error.is_some() {
            return;
        }
        if let Err(e) = self.file.write_all(batch) {
            tracing::error!("checkpoint append failed: {}", e);
            self.deferred_error = Some(e);
            return;
        }
        batch.clear();
    }

    fn flush_with_header(&mut self, status: CheckpointStatus) -> Result<()> {
        if let Some(e) = self.deferred_error.take() {
            return Err(PhotoCopyError::Io(e));
        }
        self.status = status;

        self.file.sync_all()?;

        let stats = self.shared.stats();
        let header = CheckpointHeader {
            version: self.template.version,
            status,
            start_ticks: self.template.start_ticks,
            last_update_ticks: self
                .shared
                .last_updated_ticks
                .load(Ordering::SeqCst)
                .max(self.template.start_ticks),
            total_files: self.template.total_files,
            total_bytes: self.template.total_bytes,
            completed_count: stats.completed as i32,
            completed_bytes: stats.bytes_completed as i64,
            config_hash: self.template.config_hash,
            plan_hash: self.template.plan_hash,
            source_len: self.template.source_len,
            pattern_len: self.template.pattern_len,
            records_offset: self.template.records_offset,
        };
        let mut buf = [0u8; HEADER_LEN];
        header.write_to(&mut buf);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

fn push_record(batch: &mut Vec<u8>, record: &OperationRecord) {
    let mut buf = [0u8; RECORD_LEN];
    record.write_to(&mut buf);
    batch.extend_from_slice(&buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CompletionBitmap;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn state(total: u32) -> CheckpointState {
        let now = Utc::now();
        CheckpointState {
            session_id: "test-session".to_string(),
            version: super::super::format::FORMAT_VERSION,
            status: CheckpointStatus::InProgress,
            started_at: now,
            source_dir: "/src".to_string(),
            destination_pattern: "/dest/{name}".to_string(),
            config_hash: [1; 16],
            plan_hash: [2; 16],
            total_files: total,
            total_bytes: 1000,
            bitmap: CompletionBitmap::new(total),
            failures: HashMap::new(),
            stats: CheckpointStats::empty(now),
            file_path: None,
        }
    }

    fn writer_over_temp(total: u32) -> (CheckpointWriter, PathBuf, tempfile::TempDir) {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("test.checkpoint");
        let state = state(total);

        // Pre-write header + strings + padding the way the store does.
        let offset =
            super::super::format::records_offset_for(state.source_dir.len(), state.destination_pattern.len());
        let mut file = std::fs::OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let mut prefix = vec![0u8; offset as usize];
        let header = CheckpointHeader {
            version: state.version,
            status: CheckpointStatus::InProgress,
            start_ticks: ticks_from_datetime(state.started_at),
            last_update_ticks: ticks_from_datetime(state.started_at),
            total_files: total as i32,
            total_bytes: 1000,
            completed_count: 0,
            completed_bytes: 0,
            config_hash: [1; 16],
            plan_hash: [2; 16],
            source_len: state.source_dir.len() as i32,
            pattern_len: state.destination_pattern.len() as i32,
            records_offset: offset,
        };
        let mut head = [0u8; HEADER_LEN];
        header.write_to(&mut head);
        prefix[..HEADER_LEN].copy_from_slice(&head);
        prefix[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(b"/src");
        let pattern_start = HEADER_LEN + 4;
        prefix[pattern_start..pattern_start + 12].copy_from_slice(b"/dest/{name}");
        file.write_all(&prefix).unwrap();

        (CheckpointWriter::spawn(file, &state), path, temp)
    }

    #[test]
    fn test_record_sets_bitmap_and_stats() {
        let (writer, _path, _temp) = writer_over_temp(4);

        writer.record(0, RecordOutcome::Completed, 10).unwrap();
        writer.record(1, RecordOutcome::Skipped, 5).unwrap();
        writer.record_failure(2, 7, "boom".to_string()).unwrap();

        assert!(writer.is_completed(0));
        assert!(writer.is_completed(1));
        assert!(writer.is_completed(2));
        assert!(!writer.is_completed(3));

        let stats = writer.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.bytes_completed, 10);
        assert_eq!(writer.failures().get(&2).map(String::as_str), Some("boom"));
    }

    #[test]
    fn test_flush_leaves_whole_records_on_disk() {
        let (writer, path, _temp) = writer_over_temp(10);
        for i in 0..10 {
            writer.record(i, RecordOutcome::Completed, 1).unwrap();
        }
        writer.flush().unwrap();

        let data = std::fs::read(&path).unwrap();
        let header = CheckpointHeader::read_from(&data).unwrap();
        let records_len = data.len() - header.records_offset as usize;
        assert_eq!(records_len % RECORD_LEN, 0);
        assert_eq!(records_len / RECORD_LEN, 10);
        assert_eq!(header.completed_count, 10);
        assert_eq!(header.status, CheckpointStatus::InProgress);
    }

    #[test]
    fn test_complete_stamps_terminal_status() {
        let (writer, path, _temp) = writer_over_temp(1);
        writer.record(0, RecordOutcome::Completed, 3).unwrap();
        writer.complete().unwrap();
        // Idempotent.
        writer.complete().unwrap();

        let data = std::fs::read(&path).unwrap();
        let header = CheckpointHeader::read_from(&data).unwrap();
        assert_eq!(header.status, CheckpointStatus::Completed);
        assert_eq!(header.completed_count, 1);
        assert_eq!(header.completed_bytes, 3);
    }

    #[test]
    fn test_record_after_terminal_is_rejected() {
        let (writer, _path, _temp) = writer_over_temp(2);
        writer.record(0, RecordOutcome::Completed, 1).unwrap();
        writer.complete().unwrap();

        assert!(writer.record(1, RecordOutcome::Completed, 1).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_index_panics() {
        let (writer, _path, _temp) = writer_over_temp(2);
        let _ = writer.record(2, RecordOutcome::Completed, 1);
    }

    #[test]
    fn test_drop_drains_pending_records() {
        let (writer, path, _temp) = writer_over_temp(64);
        for i in 0..64 {
            writer.record(i, RecordOutcome::Completed, 2).unwrap();
        }
        drop(writer);

        let data = std::fs::read(&path).unwrap();
        let header = CheckpointHeader::read_from(&data).unwrap();
        let records_len = data.len() - header.records_offset as usize;
        assert_eq!(records_len / RECORD_LEN, 64);
        // Disposal without a terminal call preserves the in-progress status.
        assert_eq!(header.status, CheckpointStatus::InProgress);
    }

    #[test]
    fn test_concurrent_records_from_many_threads() {
        let (writer, path, _temp) = writer_over_temp(1000);
        let writer = Arc::new(writer);

        let mut handles = Vec::new();
        for chunk in 0..10 {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    let index = chunk * 100 + i;
                    writer.record(index, RecordOutcome::Completed, 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let writer = Arc::try_unwrap(writer).ok().expect("all threads joined");
        writer.complete().unwrap();

        let data = std::fs::read(&path).unwrap();
        let header = CheckpointHeader::read_from(&data).unwrap();
        assert_eq!(header.completed_count, 1000);
        let records_len = data.len() - header.records_offset as usize;
        assert_eq!(records_len / RECORD_LEN, 1000);
        assert_eq!(records_len % RECORD_LEN, 0);
    }
}
