//! Parallel plan execution with checkpointed outcomes.
//!
//! Workers drain the plan cooperatively through a shared cursor; every
//! outcome goes to the checkpoint writer, which is also how resumed runs
//! skip work (`is_completed`). Copies land in a sibling temp file, are
//! fsynced, then renamed onto the final name, so a destination file either
//! does not exist or is complete.

use crate::checkpoint::format::RecordOutcome;
use crate::checkpoint::writer::CheckpointWriter;
use crate::duplicate_index::DuplicateIndex;
use crate::path_safety::{self, validate_generated};
use crate::pattern::DuplicatesFormat;
use crate::planner::{CopyOperation, CopyPlan};
use photocopy_common::{
    CancellationToken, CopyMode, DuplicatePolicy, OrganizeConfig, PhotoCopyError, Result,
    SourceFile,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Flush the checkpoint header after this many records...
const FLUSH_EVERY_RECORDS: u64 = 1024;
/// ...or after this much wall time, whichever comes first.
const FLUSH_EVERY: Duration = Duration::from_secs(5);
const FLUSH_POLL: Duration = Duration::from_millis(200);

/// Decides whether an incoming duplicate should still be copied.
pub type PromptCallback = Arc<dyn Fn(&SourceFile, &SourceFile) -> bool + Send + Sync>;

/// Progress observer: (records done, total operations).
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// What one execution pass did, across the whole session (resumed counts
/// included).
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duplicates: u32,
    pub cancelled: bool,
    /// Plan index and message for every failure, ascending by index.
    pub failures: Vec<(u32, String)>,
}

pub struct Executor {
    mode: CopyMode,
    concurrency: usize,
    skip_existing: bool,
    overwrite: bool,
    duplicate_policy: DuplicatePolicy,
    duplicates_format: DuplicatesFormat,
    prompt: Option<PromptCallback>,
    progress: Option<ProgressCallback>,
}

impl Executor {
    pub fn new(config: &OrganizeConfig) -> Result<Self> {
        Ok(Self {
            mode: config.mode,
            concurrency: config
                .concurrency
                .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get())),
            skip_existing: config.skip_existing,
            overwrite: config.overwrite,
            duplicate_policy: config.duplicate_policy,
            duplicates_format: DuplicatesFormat::parse(&config.duplicates_format)?,
            prompt: None,
            progress: None,
        })
    }

    pub fn with_prompt_callback(mut self, callback: PromptCallback) -> Self {
        self.prompt = Some(callback);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Execute the plan. Per-file I/O errors are recorded and never abort
    /// the run; fatal errors (unwritable destination root or checkpoint)
    /// abort after the writer is moved to a terminal state. Cancellation
    /// flushes and returns with the checkpoint still in progress.
    pub fn execute(
        &self,
        plan: &CopyPlan,
        writer: &CheckpointWriter,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary> {
        if let Err(e) = self.create_directories(plan) {
            let message = format!("destination not writable: {}", e);
            writer.fail(&message)?;
            return Err(e);
        }

        let index = DuplicateIndex::new();
        let duplicates = AtomicU32::new(0);
        let cursor = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let fatal: Mutex<Option<PhotoCopyError>> = Mutex::new(None);
        let done = AtomicBool::new(false);

        let workers = self.concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("photocopy-worker-{}", i))
            .build()
            .map_err(|e| PhotoCopyError::Io(std::io::Error::other(format!("worker pool: {}", e))))?;

        std::thread::scope(|scope| {
            let flusher = scope.spawn(|| Self::flush_loop(writer, &done));

            pool.scope(|pool_scope| {
                for _ in 0..workers {
                    pool_scope.spawn(|_| {
                        self.worker_loop(
                            plan, writer, cancel, &cursor, &index, &duplicates, &abort, &fatal,
                        );
                    });
                }
            });

            done.store(true, Ordering::SeqCst);
            let _ = flusher.join();
        });

        let cancelled = cancel.is_cancelled();
        if let Some(error) = fatal.lock().ok().and_then(|mut f| f.take()) {
            let _ = writer.fail(&error.to_string());
            return Err(error);
        }

        if cancelled {
            // Preserve the in-progress status so the run stays resumable.
            writer.flush()?;
            info!("Execution cancelled; checkpoint left in progress");
            return Ok(self.summary(writer, &duplicates, true));
        }

        let stats = writer.stats();
        if stats.failed == 0 {
            writer.complete()?;
        } else {
            writer.fail(&format!("{} operations failed", stats.failed))?;
        }

        Ok(self.summary(writer, &duplicates, false))
    }

    fn summary(
        &self,
        writer: &CheckpointWriter,
        duplicates: &AtomicU32,
        cancelled: bool,
    ) -> ExecutionSummary {
        let stats = writer.stats();
        let mut failures: Vec<(u32, String)> = writer.failures().into_iter().collect();
        failures.sort_by_key(|(index, _)| *index);
        ExecutionSummary {
            processed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            duplicates: duplicates.load(Ordering::SeqCst),
            cancelled,
            failures,
        }
    }

    fn create_directories(&self, plan: &CopyPlan) -> Result<()> {
        fs::create_dir_all(&plan.destination_root)?;
        for directory in &plan.directories {
            fs::create_dir_all(directory)?;
        }
        Ok(())
    }

    fn flush_loop(writer: &CheckpointWriter, done: &AtomicBool) {
        let mut last_flush = Instant::now();
        let mut last_count = writer.records_recorded();
        while !done.load(Ordering::SeqCst) {
            std::thread::sleep(FLUSH_POLL);
            let count = writer.records_recorded();
            let due_by_count = count.saturating_sub(last_count) >= FLUSH_EVERY_RECORDS;
            let due_by_time = last_flush.elapsed() >= FLUSH_EVERY && count > last_count;
            if due_by_count || due_by_time {
                if let Err(e) = writer.flush() {
                    warn!("periodic checkpoint flush failed: {}", e);
                }
                last_count = count;
                last_flush = Instant::now();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_loop(
        &self,
        plan: &CopyPlan,
        writer: &CheckpointWriter,
        cancel: &CancellationToken,
        cursor: &AtomicUsize,
        index: &DuplicateIndex,
        duplicates: &AtomicU32,
        abort: &AtomicBool,
        fatal: &Mutex<Option<PhotoCopyError>>,
    ) {
        loop {
            if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                return;
            }
            let position = cursor.fetch_add(1, Ordering::SeqCst);
            if position >= plan.operations.len() {
                return;
            }
            let operation = &plan.operations[position];

            // Resume fast path.
            if writer.is_completed(operation.index) {
                continue;
            }

            if let Err(error) = self.execute_operation(operation, plan, writer, index, duplicates)
            {
                // Only writer failures escape execute_operation; they are
                // fatal because outcomes can no longer be made durable.
                if let Ok(mut slot) = fatal.lock() {
                    slot.get_or_insert(error);
                }
                abort.store(true, Ordering::SeqCst);
                return;
            }

            if let Some(progress) = &self.progress {
                progress(writer.records_recorded(), plan.operations.len() as u64);
            }
        }
    }

    /// Run one operation to a recorded outcome. Per-file problems become
    /// records; the returned error is reserved for checkpoint failures.
    fn execute_operation(
        &self,
        operation: &CopyOperation,
        plan: &CopyPlan,
        writer: &CheckpointWriter,
        index: &DuplicateIndex,
        duplicates: &AtomicU32,
    ) -> Result<()> {
        let size = operation.size;

        if let Some(reason) = self.unsafe_ancestor(&operation.destination, &plan.destination_root)
        {
            writer.record_failure(operation.index, size, reason)?;
            return Ok(());
        }

        if self.duplicate_policy.needs_checksum() {
            let checksum = match operation.source.checksum_hex() {
                Ok(checksum) => checksum.to_string(),
                Err(e) => {
                    writer.record_failure(
                        operation.index,
                        size,
                        format!("checksum failed: {}", e),
                    )?;
                    return Ok(());
                }
            };

            if let Some(existing) = index.insert_if_absent(&checksum, Arc::clone(&operation.source))
            {
                duplicates.fetch_add(1, Ordering::SeqCst);
                let copy_anyway = match self.duplicate_policy {
                    DuplicatePolicy::Report => true,
                    DuplicatePolicy::Prompt => self
                        .prompt
                        .as_ref()
                        .map(|prompt| prompt(&existing, &operation.source))
                        .unwrap_or(false),
                    _ => false,
                };
                if !copy_anyway {
                    debug!(
                        "Skipping duplicate {:?} of {:?}",
                        operation.source.path, existing.path
                    );
                    writer.record(operation.index, RecordOutcome::Skipped, size)?;
                    return Ok(());
                }
                info!(
                    "Duplicate content: {:?} matches {:?}",
                    operation.source.path, existing.path
                );
            }
        }

        // A concurrent worker can grab a freshly chosen collision name
        // between our existence check and the rename, so re-resolve on
        // AlreadyExists instead of recording a failure.
        let mut attempts = 0;
        loop {
            let destination = match self.resolve_collision(operation, &plan.destination_root) {
                Ok(Some(destination)) => destination,
                Ok(None) => {
                    writer.record(operation.index, RecordOutcome::Skipped, size)?;
                    return Ok(());
                }
                Err(e) => {
                    writer.record_failure(operation.index, size, e.to_string())?;
                    return Ok(());
                }
            };

            match self.transfer(&operation.source.path, &destination) {
                Ok(outcome) => {
                    writer.record(operation.index, outcome, size)?;
                    return Ok(());
                }
                Err(PhotoCopyError::Io(e))
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && !self.overwrite
                        && !self.skip_existing
                        && attempts < 32 =>
                {
                    attempts += 1;
                }
                Err(e) => {
                    writer.record_failure(operation.index, size, e.to_string())?;
                    return Ok(());
                }
            }
        }
    }

    /// Reject the write when any directory from the destination root down
    /// to the parent is a reparse point planted after planning.
    fn unsafe_ancestor(&self, destination: &Path, root: &Path) -> Option<String> {
        let parent = destination.parent()?;
        let relative = match parent.strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => {
                return Some(format!(
                    "UnsafePath: destination {} escapes the destination root",
                    destination.display()
                ));
            }
        };

        let mut current = root.to_path_buf();
        if path_safety::is_reparse_point(&current) {
            return Some(format!(
                "UnsafePath: destination root {} is a reparse point",
                current.display()
            ));
        }
        for component in relative.components() {
            current.push(component);
            if path_safety::is_reparse_point(&current) {
                return Some(format!(
                    "UnsafePath: ancestor {} is a reparse point",
                    current.display()
                ));
            }
        }
        None
    }

    /// Pick the final destination. `None` means "skip this operation".
    fn resolve_collision(
        &self,
        operation: &CopyOperation,
        root: &Path,
    ) -> Result<Option<PathBuf>> {
        let destination = &operation.destination;
        if !destination.exists() {
            return Ok(Some(destination.clone()));
        }
        if self.overwrite {
            return Ok(Some(destination.clone()));
        }
        if self.skip_existing {
            debug!("Destination exists, skipping {:?}", destination);
            return Ok(None);
        }

        let parent = destination.parent().ok_or_else(|| {
            PhotoCopyError::UnsafePath(format!("{} has no parent", destination.display()))
        })?;
        let stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = destination
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for number in 1.. {
            let candidate = parent.join(format!(
                "{}{}{}",
                stem,
                self.duplicates_format.render(number),
                extension
            ));
            validate_generated(&candidate, root).map_err(|violation| {
                PhotoCopyError::UnsafePath(format!("{}: {}", violation, candidate.display()))
            })?;
            if !candidate.exists() {
                debug!(
                    "Collision on {:?}, renamed to {:?}",
                    destination, candidate
                );
                return Ok(Some(candidate));
            }
        }
        unreachable!("collision loop is unbounded")
    }

    fn transfer(&self, source: &Path, destination: &Path) -> Result<RecordOutcome> {
        match self.mode {
            CopyMode::Copy => {
                self.copy_durable(source, destination)?;
                Ok(RecordOutcome::Completed)
            }
            CopyMode::Move => self.move_file(source, destination),
        }
    }

    /// Copy into a sibling temp file, fsync, then atomically rename onto
    /// the final name. The destination is never observable half-written.
    fn copy_durable(&self, source: &Path, destination: &Path) -> Result<()> {
        let parent = destination.parent().ok_or_else(|| {
            PhotoCopyError::UnsafePath(format!("{} has no parent", destination.display()))
        })?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let mut reader = File::open(source)?;
        std::io::copy(&mut reader, temp.as_file_mut())?;
        temp.as_file().sync_all()?;

        if self.overwrite {
            temp.persist(destination).map_err(|e| PhotoCopyError::Io(e.error))?;
        } else {
            temp.persist_noclobber(destination)
                .map_err(|e| PhotoCopyError::Io(e.error))?;
        }

        // Timestamps are part of what we preserve; failure here is not
        // worth failing the operation for.
        if let Ok(metadata) = fs::metadata(source) {
            if let Ok(modified) = metadata.modified() {
                let _ = filetime::set_file_mtime(
                    destination,
                    filetime::FileTime::from_system_time(modified),
                );
            }
        }
        Ok(())
    }

    fn move_file(&self, source: &Path, destination: &Path) -> Result<RecordOutcome> {
        match fs::rename(source, destination) {
            Ok(()) => Ok(RecordOutcome::Completed),
            Err(e) => {
                #[cfg(unix)]
                let is_cross_device = e.raw_os_error() == Some(18); // EXDEV

                #[cfg(windows)]
                let is_cross_device = e.raw_os_error() == Some(17); // ERROR_NOT_SAME_DEVICE

                #[cfg(not(any(unix, windows)))]
                let is_cross_device = true;

                if !is_cross_device {
                    return Err(e.into());
                }

                debug!("Cross-filesystem move, using copy + delete fallback");
                self.copy_durable(source, destination)?;
                match fs::remove_file(source) {
                    Ok(()) => Ok(RecordOutcome::Completed),
                    Err(unlink_error) => {
                        warn!(
                            "Copied {:?} but could not remove the source: {}",
                            source, unlink_error
                        );
                        Ok(RecordOutcome::CopyDonePendingDelete)
                    }
                }
            }
        }
    }
}
