use photocopy_common::SourceFile;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Content-addressed index of files seen during one execution, keyed by
/// lowercase-hex SHA-256. Shared among worker tasks; mutation happens only
/// through [`insert_if_absent`](DuplicateIndex::insert_if_absent).
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    entries: RwLock<HashMap<String, Arc<SourceFile>>>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `file` as the first occurrence of `checksum`, or return the
    /// previously recorded occurrence. Lookups are case-insensitive; an
    /// empty checksum never matches anything.
    pub fn insert_if_absent(
        &self,
        checksum: &str,
        file: Arc<SourceFile>,
    ) -> Option<Arc<SourceFile>> {
        if checksum.is_empty() {
            return None;
        }
        let key = checksum.to_ascii_lowercase();

        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(&key) {
            Some(existing) => Some(Arc::clone(existing)),
            None => {
                entries.insert(key, file);
                None
            }
        }
    }

    /// Look up the first-seen file for a checksum without inserting.
    pub fn get(&self, checksum: &str) -> Option<Arc<SourceFile>> {
        if checksum.is_empty() {
            return None;
        }
        let key = checksum.to_ascii_lowercase();
        self.entries
            .read()
            .ok()?
            .get(&key)
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
