//! Resources, rule results and provenance events.
//!
//! Resources are the immutable values that flow between goals. Each one may
//! carry the rule call that produced it; provenance never takes part in
//! equality.

use super::tree::Location;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Resources
// ============================================================================

/// Kind of a resource, or the kind a parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    String,
    Bool,
    /// Parameter accepts any resource unchanged.
    Any,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// The rule call a resource came out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub rule: String,
    pub goal: String,
    pub at: Location,
}

#[derive(Debug, Clone)]
pub struct FileResource {
    pub path: PathBuf,
    /// Directory `path` is considered relative to.
    pub root: PathBuf,
    /// Stand-in path for ABI-only artifacts.
    pub placeholder: Option<PathBuf>,
    pub provenance: Option<Arc<Provenance>>,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
            placeholder: None,
            provenance: None,
        }
    }

    /// Path relative to the root, or the full path when outside it.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix(&self.root).unwrap_or(&self.path)
    }
}

impl PartialEq for FileResource {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.root == other.root && self.placeholder == other.placeholder
    }
}

impl Eq for FileResource {}

#[derive(Debug, Clone)]
pub struct StringResource {
    pub value: String,
    /// Module the literal was written in.
    pub module: String,
    pub provenance: Option<Arc<Provenance>>,
}

impl PartialEq for StringResource {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.module == other.module
    }
}

impl Eq for StringResource {}

#[derive(Debug, Clone)]
pub struct BoolResource {
    pub value: bool,
    pub provenance: Option<Arc<Provenance>>,
}

impl PartialEq for BoolResource {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for BoolResource {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File(FileResource),
    String(StringResource),
    Bool(BoolResource),
}

impl Resource {
    pub fn string(value: impl Into<String>, module: &str) -> Self {
        Self::String(StringResource {
            value: value.into(),
            module: module.to_string(),
            provenance: None,
        })
    }

    pub fn file(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::File(FileResource::new(path, root))
    }

    pub fn bool(value: bool) -> Self {
        Self::Bool(BoolResource {
            value,
            provenance: None,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::File(_) => ResourceKind::File,
            Self::String(_) => ResourceKind::String,
            Self::Bool(_) => ResourceKind::Bool,
        }
    }

    pub fn provenance(&self) -> Option<&Arc<Provenance>> {
        match self {
            Self::File(r) => r.provenance.as_ref(),
            Self::String(r) => r.provenance.as_ref(),
            Self::Bool(r) => r.provenance.as_ref(),
        }
    }

    pub fn with_provenance(mut self, provenance: Arc<Provenance>) -> Self {
        match &mut self {
            Self::File(r) => r.provenance = Some(provenance),
            Self::String(r) => r.provenance = Some(provenance),
            Self::Bool(r) => r.provenance = Some(provenance),
        }
        self
    }

    /// Persistable description, without provenance.
    pub fn info(&self) -> ResourceInfo {
        match self {
            Self::File(r) => ResourceInfo::File {
                path: r.path.clone(),
                root: r.root.clone(),
                placeholder: r.placeholder.clone(),
            },
            Self::String(r) => ResourceInfo::String {
                value: r.value.clone(),
                module: r.module.clone(),
            },
            Self::Bool(r) => ResourceInfo::Bool { value: r.value },
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(r) => write!(f, "{}", r.path.display()),
            Self::String(r) => write!(f, "{}", r.value),
            Self::Bool(r) => write!(f, "{}", r.value),
        }
    }
}

/// Serialized form of a resource inside invocation records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceInfo {
    File {
        path: PathBuf,
        root: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<PathBuf>,
    },
    String {
        value: String,
        module: String,
    },
    Bool {
        value: bool,
    },
}

impl ResourceInfo {
    /// False for a file that has disappeared since it was recorded.
    pub fn is_present(&self) -> bool {
        match self {
            Self::File { path, .. } => path.exists(),
            Self::String { .. } | Self::Bool { .. } => true,
        }
    }

    pub fn into_resource(self, provenance: Option<Arc<Provenance>>) -> Resource {
        match self {
            Self::File {
                path,
                root,
                placeholder,
            } => Resource::File(FileResource {
                path,
                root,
                placeholder,
                provenance,
            }),
            Self::String { value, module } => Resource::String(StringResource {
                value,
                module,
                provenance,
            }),
            Self::Bool { value } => Resource::Bool(BoolResource { value, provenance }),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// One rule call on the way to a failure, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub rule: String,
    pub at: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for entry in &self.trace {
            write!(f, "\n    at {} ({})", entry.rule, entry.at)?;
        }
        Ok(())
    }
}

/// Outcome of evaluating a goal or rule call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleResult {
    Success(Vec<Resource>),
    Failed(Failure),
}

impl RuleResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(Failure::new(message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn resources(&self) -> &[Resource] {
        match self {
            Self::Success(resources) => resources,
            Self::Failed(_) => &[],
        }
    }
}

/// Diagnostic emitted by a rule executor, replayed on cache hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Provenance events (JSONL)
// ============================================================================

/// Build event appended to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    BuildStarted {
        run_id: String,
        goal: String,
        kiln_version: String,
    },
    GoalStarted {
        goal: String,
    },
    GoalCompleted {
        goal: String,
        resources: usize,
        duration_seconds: f64,
    },
    GoalFailed {
        goal: String,
        error: String,
    },
    RuleCached {
        goal: String,
        rule: String,
    },
    RuleExecuted {
        goal: String,
        rule: String,
        success: bool,
        duration_seconds: f64,
    },
    BuildCompleted {
        run_id: String,
        goals_succeeded: u32,
        goals_failed: u32,
        rules_executed: u32,
        rules_cached: u32,
        total_seconds: f64,
    },
}

/// Event with run id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    pub run_id: String,
    #[serde(flatten)]
    pub event: BuildEvent,
}
