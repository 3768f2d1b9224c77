use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use photocopy_common::{CancellationToken, PhotoCopyError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file found by source enumeration, before metadata enrichment.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Parallel source-tree scanner using jwalk. Symbolic links are never
/// followed, so a link cycle cannot trap the walk; reparse-point entries
/// themselves are excluded from the results.
pub struct SourceScanner {
    max_depth: Option<usize>,
}

impl SourceScanner {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self { max_depth }
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedFile>> {
        self.scan_with_cancel(root, None)
    }

    pub fn scan_with_cancel(
        &self,
        root: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ScannedFile>> {
        let mut walker = WalkDir::new(root).follow_links(false).skip_hidden(false);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        for entry in walker {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(PhotoCopyError::Cancelled);
            }

            let entry = entry.map_err(|e| {
                PhotoCopyError::Io(std::io::Error::other(format!("walk error: {}", e)))
            })?;

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                debug!("Skipping reparse point {:?}", entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| {
                PhotoCopyError::Io(std::io::Error::other(format!("metadata error: {}", e)))
            })?;

            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH));

            files.push(ScannedFile {
                path: entry.path(),
                size: metadata.len(),
                modified,
            });
        }

        debug!("Scanned {} files from {:?}", files.len(), root);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_finds_files_not_directories() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested/b.jpg"), b"bb").unwrap();

        let scanner = SourceScanner::new(None);
        let files = scanner.scan(temp.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.path.is_file()));
    }

    #[test]
    fn test_scan_respects_max_depth() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("top.jpg"), b"a").unwrap();
        fs::create_dir_all(temp.path().join("one/two")).unwrap();
        fs::write(temp.path().join("one/mid.jpg"), b"b").unwrap();
        fs::write(temp.path().join("one/two/deep.jpg"), b"c").unwrap();

        let scanner = SourceScanner::new(Some(2));
        let files = scanner.scan(temp.path()).unwrap();

        let names: Vec<_> = files
            .iter()
            .filter_map(|f| f.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"top.jpg".to_string()));
        assert!(names.contains(&"mid.jpg".to_string()));
        assert!(!names.contains(&"deep.jpg".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_does_not_follow_symlink_loops() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();
        // Link back to the root; following it would loop forever.
        std::os::unix::fs::symlink(temp.path(), temp.path().join("loop")).unwrap();

        let scanner = SourceScanner::new(None);
        let files = scanner.scan(temp.path()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_scan_cancellation() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let scanner = SourceScanner::new(None);
        let err = scanner.scan_with_cancel(temp.path(), Some(&token)).unwrap_err();
        assert!(matches!(err, PhotoCopyError::Cancelled));
    }
}
