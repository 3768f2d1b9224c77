use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

/// Resolved place names for a photograph, as supplied by a location provider.
/// Every field may be absent; missing values are replaced by the configured
/// fallback string when rendering destination paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationData {
    pub district: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

/// Whether files are copied into the destination tree or moved out of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    Copy,
    Move,
}

impl CopyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyMode::Copy => "Copy",
            CopyMode::Move => "Move",
        }
    }
}

/// What to do when two source files have identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Duplicate detection disabled; no checksums are computed.
    #[default]
    None,
    /// The first occurrence is kept; later copies are skipped.
    Skip,
    /// Duplicates are copied anyway and reported in the summary.
    Report,
    /// An interactive front-end decides; without a prompt callback this
    /// behaves like `Skip`.
    Prompt,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::None => "None",
            DuplicatePolicy::Skip => "Skip",
            DuplicatePolicy::Report => "Report",
            DuplicatePolicy::Prompt => "Prompt",
        }
    }

    /// True when executing under this policy requires file checksums.
    pub fn needs_checksum(&self) -> bool {
        !matches!(self, DuplicatePolicy::None)
    }
}

/// Casing transform applied to substituted pattern values. Literal path
/// segments in the pattern are never transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathCasing {
    #[default]
    Original,
    Lowercase,
    Uppercase,
    TitleCase,
    PascalCase,
    CamelCase,
    SnakeCase,
    KebabCase,
    ScreamingSnakeCase,
}

impl PathCasing {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathCasing::Original => "Original",
            PathCasing::Lowercase => "Lowercase",
            PathCasing::Uppercase => "Uppercase",
            PathCasing::TitleCase => "TitleCase",
            PathCasing::PascalCase => "PascalCase",
            PathCasing::CamelCase => "CamelCase",
            PathCasing::SnakeCase => "SnakeCase",
            PathCasing::KebabCase => "KebabCase",
            PathCasing::ScreamingSnakeCase => "ScreamingSnakeCase",
        }
    }
}

/// How precise a place name the location provider should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationGranularity {
    District,
    #[default]
    City,
    County,
    State,
    Country,
}

impl LocationGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationGranularity::District => "District",
            LocationGranularity::City => "City",
            LocationGranularity::County => "County",
            LocationGranularity::State => "State",
            LocationGranularity::Country => "Country",
        }
    }
}

/// Identifier for one organise session, embedded in the checkpoint filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 bytes, the width stored in checkpoint headers.
    pub fn prefix(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.0[..16]);
        out
    }
}

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Compute the SHA-256 of a file's contents, streaming in 1MB chunks.
pub fn sha256_file(path: &Path) -> Result<Sha256Hash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Sha256Hash(hasher.finalize().into()))
}

/// A file discovered by source enumeration, enriched with metadata.
///
/// The content checksum is computed lazily, at most once, and only when the
/// duplicate policy requires it.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub exif_timestamp: Option<DateTime<Utc>>,
    pub location: Option<LocationData>,
    pub camera: Option<String>,
    checksum: OnceLock<String>,
}

impl SourceFile {
    pub fn new(path: PathBuf, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            size,
            modified,
            exif_timestamp: None,
            location: None,
            camera: None,
            checksum: OnceLock::new(),
        }
    }

    pub fn with_exif_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.exif_timestamp = timestamp;
        self
    }

    pub fn with_location(mut self, location: Option<LocationData>) -> Self {
        self.location = location;
        self
    }

    pub fn with_camera(mut self, camera: Option<String>) -> Self {
        self.camera = camera;
        self
    }

    /// The timestamp that drives date pattern variables: EXIF when present,
    /// filesystem mtime otherwise.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.exif_timestamp.unwrap_or(self.modified)
    }

    /// The content checksum if it has already been computed.
    pub fn cached_checksum(&self) -> Option<&str> {
        self.checksum.get().map(String::as_str)
    }

    /// Lowercase-hex SHA-256 of the file contents, computed on first use.
    pub fn checksum_hex(&self) -> Result<&str> {
        if let Some(existing) = self.checksum.get() {
            return Ok(existing);
        }
        let computed = sha256_file(&self.path)?.to_hex();
        Ok(self.checksum.get_or_init(move || computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin");
        fs::write(&path, b"abc").unwrap();

        let hash = sha256_file(&path).unwrap();
        // Well-known SHA-256("abc")
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_checksum_computed_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin");
        fs::write(&path, b"content").unwrap();

        let file = SourceFile::new(path.clone(), 7, Utc::now());
        assert!(file.cached_checksum().is_none());

        let first = file.checksum_hex().unwrap().to_string();

        // Changing the file after the first computation must not change the
        // cached value.
        fs::write(&path, b"different").unwrap();
        let second = file.checksum_hex().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_timestamp_prefers_exif() {
        let mtime = Utc::now();
        let exif = mtime - chrono::Duration::days(30);

        let plain = SourceFile::new(PathBuf::from("a.jpg"), 1, mtime);
        assert_eq!(plain.timestamp(), mtime);

        let tagged = SourceFile::new(PathBuf::from("a.jpg"), 1, mtime)
            .with_exif_timestamp(Some(exif));
        assert_eq!(tagged.timestamp(), exif);
    }

    #[test]
    fn test_hash_prefix() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let hash = Sha256Hash(bytes);
        assert_eq!(hash.prefix(), bytes[..16]);
    }
}
