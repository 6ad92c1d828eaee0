//! Invocation records: load, save (atomic), key derivation.
//!
//! One record per native rule call site of a goal, stored as YAML at
//! `<out_dir>/<module path>/<goal>/<rule>.<call digest>.lastcall`. A record
//! that cannot be read or parsed counts as absent.

use super::fingerprint::Fingerprint;
use super::types::{Message, Resource, ResourceInfo};
use crate::lang::loader::module_dir;
use crate::provenance::eventlog::now_iso8601;
use crate::provenance::hasher::short_digest;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const RECORD_EXTENSION: &str = "lastcall";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub schema: String,
    pub rule: String,
    pub goal: String,
    pub generated_at: String,
    pub generator: String,
    pub fingerprint: Fingerprint,
    pub result: Vec<ResourceInfo>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl InvocationRecord {
    pub fn new(
        rule: &str,
        goal: &str,
        fingerprint: Fingerprint,
        resources: &[Resource],
        messages: Vec<Message>,
    ) -> Self {
        Self {
            schema: "1.0".to_string(),
            rule: rule.to_string(),
            goal: goal.to_string(),
            generated_at: now_iso8601(),
            generator: format!("kiln {}", env!("CARGO_PKG_VERSION")),
            fingerprint,
            result: resources.iter().map(Resource::info).collect(),
            messages,
        }
    }
}

/// Output directory owned by a goal.
pub fn target_path(out_dir: &Path, module: &str, goal: &str) -> PathBuf {
    module_dir(out_dir, module).join(goal)
}

/// Record key for one call site; `call_chain` tells apart calls of the same
/// rule within one goal.
pub fn record_path(target_path: &Path, rule: &str, call_chain: &[String]) -> PathBuf {
    let parts: Vec<&str> = call_chain.iter().map(String::as_str).collect();
    target_path.join(format!(
        "{}.{}.{}",
        rule,
        short_digest(&parts),
        RECORD_EXTENSION
    ))
}

/// Load a record. Returns None if the file doesn't exist.
pub fn load_record(path: &Path) -> Result<Option<InvocationRecord>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let record: InvocationRecord = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid record {}: {}", path.display(), e))?;
    Ok(Some(record))
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Save a record atomically (write to temp, then rename).
pub fn save_record(path: &Path, record: &InvocationRecord) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(record).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension(format!(
        "{}.{}-{}.tmp",
        RECORD_EXTENSION,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Every record below `out_dir`, sorted by path.
pub fn list_records(out_dir: &Path) -> Result<Vec<(PathBuf, InvocationRecord)>, String> {
    fn walk(dir: &Path, found: &mut Vec<(PathBuf, InvocationRecord)>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("cannot read dir {}: {}", dir.display(), e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, found)?;
            } else if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                if let Ok(Some(record)) = load_record(&path) {
                    found.push((path, record));
                }
            }
        }
        Ok(())
    }

    let mut found = Vec::new();
    if out_dir.is_dir() {
        walk(out_dir, &mut found)?;
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Persisted invocation records by key.
pub trait RecordStore: Send + Sync {
    /// The stored record, or None when missing or unreadable.
    fn read(&self, key: &Path) -> Option<InvocationRecord>;

    fn write(&self, key: &Path, record: &InvocationRecord) -> Result<(), String>;
}

/// Records as YAML files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRecordStore;

impl RecordStore for FsRecordStore {
    fn read(&self, key: &Path) -> Option<InvocationRecord> {
        load_record(key).ok().flatten()
    }

    fn write(&self, key: &Path, record: &InvocationRecord) -> Result<(), String> {
        save_record(key, record)
    }
}

/// Records kept in memory, encoded the same way as on disk.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<FxHashMap<PathBuf, String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the raw bytes stored under a key.
    pub fn put_raw(&self, key: &Path, raw: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_path_buf(), raw.to_string());
    }

    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self, key: &Path) -> Option<InvocationRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        serde_yaml_ng::from_str(records.get(key)?).ok()
    }

    fn write(&self, key: &Path, record: &InvocationRecord) -> Result<(), String> {
        let yaml = serde_yaml_ng::to_string(record).map_err(|e| format!("serialize error: {}", e))?;
        self.put_raw(key, &yaml);
        Ok(())
    }
}
