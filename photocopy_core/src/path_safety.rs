use photocopy_common::{PhotoCopyError, Result};
use std::path::{Component, Path, PathBuf};

/// Why a generated destination path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathViolation {
    /// The candidate is not an absolute path.
    NotAbsolute,
    /// A path segment equals exactly `..`.
    TraversalSegment,
    /// The candidate resolves outside the destination root.
    EscapesRoot,
}

impl PathViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathViolation::NotAbsolute => "NotAbsolute",
            PathViolation::TraversalSegment => "TraversalSegment",
            PathViolation::EscapesRoot => "EscapesRoot",
        }
    }
}

impl std::fmt::Display for PathViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexically resolve an absolute path: collapse `.` and `..`, keep the leaf
/// untouched (symlinks are not followed). Relative paths are rejected.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(PhotoCopyError::UnsafePath(format!(
            "path is not absolute: {}",
            path.display()
        )));
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            // pop() is a no-op at the root, so `..` cannot climb above it
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    Ok(out)
}

/// True iff `candidate` lies within `root` after normalisation. The
/// comparison is component-wise, so `/Photos` does not contain
/// `/PhotosEvil/x`.
pub fn is_within(candidate: &Path, root: &Path) -> bool {
    match (normalize(candidate), normalize(root)) {
        (Ok(candidate), Ok(root)) => candidate.starts_with(&root),
        _ => false,
    }
}

/// Validate a renderer-generated destination path against the destination
/// root. `..` inside a filename (e.g. `a..b.jpg`) is not traversal; only a
/// segment that is exactly `..` is.
pub fn validate_generated(
    candidate: &Path,
    root: &Path,
) -> std::result::Result<(), PathViolation> {
    if !candidate.is_absolute() {
        return Err(PathViolation::NotAbsolute);
    }

    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PathViolation::TraversalSegment);
    }

    if !is_within(candidate, root) {
        return Err(PathViolation::EscapesRoot);
    }

    Ok(())
}

/// The longest absolute prefix of `pattern` containing no `{...}` variable.
///
/// A pattern that begins with a variable (or whose static prefix is
/// relative) roots at the current working directory. A static prefix that
/// does not end at a separator contributes only the parent of its last
/// literal component.
pub fn extract_destination_root(pattern: &str) -> Result<PathBuf> {
    let static_prefix = match pattern.find('{') {
        Some(idx) => &pattern[..idx],
        None => pattern,
    };

    let prefix_path = Path::new(static_prefix);
    if static_prefix.is_empty() || !prefix_path.is_absolute() {
        return Ok(std::env::current_dir()?);
    }

    if static_prefix.ends_with('/') || static_prefix.ends_with('\\') {
        return normalize(prefix_path);
    }

    match prefix_path.parent() {
        Some(parent) if parent.is_absolute() => normalize(parent),
        _ => Ok(std::env::current_dir()?),
    }
}

/// True iff the leaf of `path` is a symbolic link, junction or equivalent
/// reparse point. Non-existent paths and I/O errors report false.
pub fn is_reparse_point(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata.file_type().is_symlink(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_dots() {
        let normalized = normalize(Path::new("/a/b/../c/./d")).unwrap();
        assert_eq!(normalized, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn test_normalize_rejects_relative() {
        assert!(normalize(Path::new("relative/path")).is_err());
    }

    #[test]
    fn test_normalize_cannot_climb_above_root() {
        let normalized = normalize(Path::new("/../../etc/passwd")).unwrap();
        assert_eq!(normalized, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn test_is_within_rejects_prefix_confusion() {
        assert!(is_within(Path::new("/Photos/2024/a.jpg"), Path::new("/Photos")));
        assert!(!is_within(Path::new("/PhotosEvil/a.jpg"), Path::new("/Photos")));
    }

    #[test]
    fn test_is_within_root_itself() {
        assert!(is_within(Path::new("/Photos"), Path::new("/Photos")));
    }

    #[test]
    fn test_validate_generated_traversal_segment() {
        let err = validate_generated(Path::new("/dest/../escape/a.jpg"), Path::new("/dest"));
        assert_eq!(err, Err(PathViolation::TraversalSegment));
    }

    #[test]
    fn test_validate_generated_dots_in_filename_allowed() {
        validate_generated(Path::new("/dest/a..b.jpg"), Path::new("/dest")).unwrap();
    }

    #[test]
    fn test_validate_generated_escapes_root() {
        let err = validate_generated(Path::new("/elsewhere/a.jpg"), Path::new("/dest"));
        assert_eq!(err, Err(PathViolation::EscapesRoot));
    }

    #[test]
    fn test_validate_generated_not_absolute() {
        let err = validate_generated(Path::new("relative/a.jpg"), Path::new("/dest"));
        assert_eq!(err, Err(PathViolation::NotAbsolute));
    }

    #[test]
    fn test_validate_generated_is_idempotent() {
        let candidate = Path::new("/dest/2024/a.jpg");
        let root = Path::new("/dest");
        for _ in 0..3 {
            validate_generated(candidate, root).unwrap();
        }
    }

    #[test]
    fn test_extract_root_with_separator_boundary() {
        let root = extract_destination_root("/dest/photos/{year}/{name}").unwrap();
        assert_eq!(root, PathBuf::from("/dest/photos"));
    }

    #[test]
    fn test_extract_root_partial_component() {
        let root = extract_destination_root("/dest/photos{year}/{name}").unwrap();
        assert_eq!(root, PathBuf::from("/dest"));
    }

    #[test]
    fn test_extract_root_leading_variable_uses_cwd() {
        let root = extract_destination_root("{year}/{name}").unwrap();
        assert_eq!(root, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_extract_root_no_variables() {
        let root = extract_destination_root("/dest/out").unwrap();
        assert_eq!(root, PathBuf::from("/dest"));
    }

    #[cfg(unix)]
    #[test]
    fn test_reparse_point_detection() {
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let target = temp.path().join("real");
        std::fs::create_dir(&target).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(is_reparse_point(&link));
        assert!(!is_reparse_point(&target));
        assert!(!is_reparse_point(&temp.path().join("missing")));
    }
}
