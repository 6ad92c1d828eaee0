//! Project settings from `kiln.yaml`.
//!
//! The file is optional; every field has a default. Validation collects all
//! problems instead of stopping at the first.

use super::fingerprint::FingerprintMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "kiln.yaml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Worker threads; unset means 1.5x the available cores, at least 4.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Goal outputs and invocation records, relative to the project.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Event log and other bookkeeping, relative to the project.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub fingerprint: FingerprintMode,

    #[serde(default = "default_true")]
    pub event_log: bool,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("kiln-out")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".kiln")
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: None,
            out_dir: default_out_dir(),
            cache_dir: default_cache_dir(),
            fingerprint: FingerprintMode::default(),
            event_log: true,
        }
    }
}

impl Settings {
    pub fn jobs(&self) -> usize {
        self.jobs.filter(|j| *j > 0).unwrap_or_else(default_jobs)
    }

    pub fn out_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.out_dir)
    }

    pub fn cache_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.cache_dir)
    }
}

/// 1.5x hardware concurrency, minimum 4.
pub fn default_jobs() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 3 / 2).max(4)
}

/// Parse settings from a string.
pub fn parse_settings(yaml: &str) -> Result<Settings, String> {
    if yaml.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Load `kiln.yaml` from the project directory; defaults when absent.
pub fn load_settings(project_dir: &Path) -> Result<Settings, String> {
    let path = project_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_settings(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Validate parsed settings. Returns a list of errors (empty = valid).
pub fn validate_settings(settings: &Settings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if settings.jobs == Some(0) {
        errors.push(ValidationError {
            message: "jobs must be at least 1".to_string(),
        });
    }
    if settings.out_dir.as_os_str().is_empty() {
        errors.push(ValidationError {
            message: "out_dir must not be empty".to_string(),
        });
    }
    if settings.cache_dir.as_os_str().is_empty() {
        errors.push(ValidationError {
            message: "cache_dir must not be empty".to_string(),
        });
    }
    if settings.out_dir == settings.cache_dir {
        errors.push(ValidationError {
            message: format!(
                "out_dir and cache_dir must differ, both are '{}'",
                settings.out_dir.display()
            ),
        });
    }

    errors
}
