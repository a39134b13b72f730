//! Local persisted cache
//!
//! Key/value store holding the last-known pregnancy record and per-week
//! development content, mirrored best-effort to a JSON file shared by
//! all tabs. Writes are synchronous from the caller's perspective; a
//! failing backing store is logged and the session degrades to
//! in-memory-only behavior. Callers never see a storage error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, warn};

use nestling_common::model::{
    CachedPregnancyRecord, DevelopmentSnapshot, PregnancyRecord, Provenance,
};
use nestling_common::time;

/// Cache key for the session's pregnancy record
fn pregnancy_key(scope: &str) -> String {
    format!("pregnancy:{scope}")
}

/// Cache key for a week's development content; the language is part of
/// the key so a language switch never serves stale-language content
fn development_key(week: u8, language: &str) -> String {
    format!("development:{week}:{language}")
}

/// Persisted key/value cache with a JSON file mirror
pub struct PersistedCache {
    entries: Mutex<HashMap<String, Value>>,
    /// None when storage is unavailable (in-memory-only session)
    path: Option<PathBuf>,
}

impl PersistedCache {
    /// Open the cache backed by the given file, loading any existing
    /// contents. Load failures start an empty cache with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load cache file, starting empty");
                HashMap::new()
            }
        };
        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    /// Cache with no backing file (storage-unavailable degradation and
    /// tests)
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Raw read under a namespaced key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().expect("cache lock poisoned").get(key).cloned()
    }

    /// Raw write under a namespaced key; persisted best-effort
    pub fn set(&self, key: &str, value: Value) {
        {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            entries.insert(key.to_string(), value);
        }
        self.persist();
    }

    /// Last-known pregnancy record with its provenance overlay
    pub fn pregnancy_record(&self, scope: &str) -> Option<CachedPregnancyRecord> {
        let value = self.get(&pregnancy_key(scope))?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(scope, error = %e, "Discarding undecodable cached pregnancy record");
                None
            }
        }
    }

    /// Store a record adopted from the server
    pub fn save_server_record(&self, scope: &str, record: &PregnancyRecord) -> CachedPregnancyRecord {
        self.save_with_provenance(scope, record, Provenance::Server)
    }

    /// Store a locally computed record, stamped user-specified so it
    /// outranks older server data during reconciliation
    pub fn save_user_record(&self, scope: &str, record: &PregnancyRecord) -> CachedPregnancyRecord {
        self.save_with_provenance(scope, record, Provenance::UserSpecified)
    }

    fn save_with_provenance(
        &self,
        scope: &str,
        record: &PregnancyRecord,
        provenance: Provenance,
    ) -> CachedPregnancyRecord {
        let cached = CachedPregnancyRecord {
            record: record.clone(),
            provenance,
            local_timestamp: time::now(),
        };
        match serde_json::to_value(&cached) {
            Ok(value) => self.set(&pregnancy_key(scope), value),
            Err(e) => warn!(scope, error = %e, "Could not encode pregnancy record for cache"),
        }
        debug!(scope, week = record.current_week, ?provenance, "Cached pregnancy record");
        cached
    }

    /// Cached development content for `(week, language)`, if any
    pub fn development(&self, week: u8, language: &str) -> Option<DevelopmentSnapshot> {
        let value = self.get(&development_key(week, language))?;
        match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(week, language, error = %e, "Discarding undecodable cached development snapshot");
                None
            }
        }
    }

    /// Store development content under its `(week, language)` key
    pub fn save_development(&self, snapshot: &DevelopmentSnapshot) {
        match serde_json::to_value(snapshot) {
            Ok(value) => self.set(&development_key(snapshot.week, &snapshot.language), value),
            Err(e) => {
                warn!(week = snapshot.week, error = %e, "Could not encode development snapshot")
            }
        }
    }

    /// Mirror the in-memory map to the backing file. Failures are
    /// logged and swallowed; the in-memory map stays authoritative.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = {
            let entries = self.entries.lock().expect("cache lock poisoned");
            entries.clone()
        };
        if let Err(e) = write_entries(path, &snapshot) {
            warn!(path = %path.display(), error = %e, "Cache write failed, continuing in memory");
        }
    }
}

fn load_entries(path: &Path) -> std::io::Result<HashMap<String, Value>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Atomic write: temp file in the same directory, then rename
fn write_entries(path: &Path, entries: &HashMap<String, Value>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestling_common::model::PregnancyRecord;

    #[test]
    fn test_pregnancy_record_round_trip() {
        let cache = PersistedCache::in_memory();
        let record = PregnancyRecord::default_record();

        assert!(cache.pregnancy_record("local").is_none());

        cache.save_user_record("local", &record);
        let cached = cache.pregnancy_record("local").expect("record cached");
        assert_eq!(cached.record.current_week, record.current_week);
        assert_eq!(cached.provenance, Provenance::UserSpecified);
    }

    #[test]
    fn test_updates_replace_never_append() {
        let cache = PersistedCache::in_memory();
        let first = PregnancyRecord::default_record();
        let mut second = PregnancyRecord::default_record();
        second.current_week = 20;

        cache.save_server_record("local", &first);
        cache.save_server_record("local", &second);

        let cached = cache.pregnancy_record("local").unwrap();
        assert_eq!(cached.record.current_week, 20);
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_development_keyed_by_week_and_language() {
        let cache = PersistedCache::in_memory();
        let snapshot = DevelopmentSnapshot {
            week: 20,
            language: "en".to_string(),
            size_comparison: "banana".to_string(),
            narrative: "halfway there".to_string(),
            tips: vec!["hydrate".to_string()],
        };
        cache.save_development(&snapshot);

        assert_eq!(cache.development(20, "en"), Some(snapshot));
        assert!(cache.development(20, "ko").is_none());
        assert!(cache.development(21, "en").is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let cache = PersistedCache::open(&path);
            let mut record = PregnancyRecord::default_record();
            record.current_week = 33;
            cache.save_user_record("local", &record);
        }

        let reopened = PersistedCache::open(&path);
        let cached = reopened.pregnancy_record("local").expect("survives reopen");
        assert_eq!(cached.record.current_week, 33);
        assert_eq!(cached.provenance, Provenance::UserSpecified);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json at all").unwrap();

        let cache = PersistedCache::open(&path);
        assert!(cache.pregnancy_record("local").is_none());
    }

    #[test]
    fn test_unwritable_path_degrades_silently() {
        // Directory path that cannot be created as a file
        let cache = PersistedCache::open("/proc/nestling-definitely-unwritable/cache.json");
        let record = PregnancyRecord::default_record();

        // Write must not panic; in-memory map stays usable
        cache.save_user_record("local", &record);
        assert!(cache.pregnancy_record("local").is_some());
    }
}
