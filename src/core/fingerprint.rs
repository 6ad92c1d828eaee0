//! Invocation fingerprints.
//!
//! A fingerprint is the bound parameter object flattened into ordered
//! `(parameter, resources)` pairs. Files contribute their path, root,
//! placeholder and current length and modification time; strings their value
//! and defining module. In `content` mode files also contribute a BLAKE3
//! hash of their bytes. A missing file fingerprints as length 0 without a
//! modification time.

use super::binding::{ParamValue, RuleParameters};
use super::types::{FileResource, Resource};
use crate::provenance::hasher::hash_file;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Length plus modification time.
    #[default]
    #[value(name = "size_mtime")]
    SizeMtime,
    /// Length, modification time and a BLAKE3 content hash.
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub params: Vec<ParamFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamFingerprint {
    pub name: String,
    pub resources: Vec<ResourceFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceFingerprint {
    File {
        path: PathBuf,
        root: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<PathBuf>,
        length: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    String {
        value: String,
        module: String,
    },
    Bool {
        value: bool,
    },
}

impl Fingerprint {
    pub fn of(params: &RuleParameters, mode: FingerprintMode) -> Self {
        let params = params
            .iter()
            .map(|(name, value)| {
                let resources = match value {
                    ParamValue::Single(r) => vec![resource(r, mode)],
                    ParamValue::List(items) => items.iter().map(|r| resource(r, mode)).collect(),
                    ParamValue::Absent => Vec::new(),
                };
                ParamFingerprint {
                    name: name.to_string(),
                    resources,
                }
            })
            .collect();
        Self { params }
    }
}

fn resource(resource: &Resource, mode: FingerprintMode) -> ResourceFingerprint {
    match resource {
        Resource::File(f) => file(f, mode),
        Resource::String(s) => ResourceFingerprint::String {
            value: s.value.clone(),
            module: s.module.clone(),
        },
        Resource::Bool(b) => ResourceFingerprint::Bool { value: b.value },
    }
}

fn file(f: &FileResource, mode: FingerprintMode) -> ResourceFingerprint {
    let metadata = std::fs::metadata(&f.path).ok();
    let length = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
    let modified_ms = metadata
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| u64::try_from(d.as_millis()).ok());
    let content = match mode {
        FingerprintMode::Content if f.path.is_file() => hash_file(&f.path).ok(),
        _ => None,
    };
    ResourceFingerprint::File {
        path: f.path.clone(),
        root: f.root.clone(),
        placeholder: f.placeholder.clone(),
        length,
        modified_ms,
        content,
    }
}
