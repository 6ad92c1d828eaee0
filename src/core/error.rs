//! Error types for parsing, resolution, graph construction and parameter binding.
//!
//! Resolution and graph errors abort a build before anything is scheduled.
//! Binding errors never escape the engine: they turn into `Failed` results
//! for the offending rule call.

use super::tree::Location;
use super::types::ResourceKind;
use thiserror::Error;

pub type KilnResult<T> = Result<T, KilnError>;

/// Syntax error in a build file.
#[derive(Debug, Clone, Error)]
#[error("{at}: {message}")]
pub struct ParseError {
    pub at: Location,
    pub message: String,
}

impl ParseError {
    pub fn new(at: Location, message: impl Into<String>) -> Self {
        Self {
            at,
            message: message.into(),
        }
    }
}

/// Fatal errors raised while resolving build files into value trees.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("cannot load module '{module}': {error}")]
    ModuleLoad { module: String, error: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{at}: unknown goal '{name}'")]
    UnknownGoal { name: String, at: Location },

    #[error("{at}: goal '{name}' is defined in multiple imported modules: {}", modules.join(", "))]
    AmbiguousGoal {
        name: String,
        modules: Vec<String>,
        at: Location,
    },

    #[error("{at}: unknown rule '{name}'")]
    UnknownRule { name: String, at: Location },

    #[error("{at}: rule '{name}' is defined in multiple imported modules: {}", modules.join(", "))]
    AmbiguousRule {
        name: String,
        modules: Vec<String>,
        at: Location,
    },

    #[error("{at}: invalid parameters for '{rule}': {message}")]
    InvalidParameter {
        rule: String,
        message: String,
        at: Location,
    },

    #[error("{at}: '{rule}' is not anonymously callable and may only be the direct value of a goal or rule")]
    IllegalRuleCall { rule: String, at: Location },

    #[error("{at}: no native rule '{rule}' is registered")]
    UnsupportedRule { rule: String, at: Location },

    #[error("module '{module}': cannot export undefined rules/goals: {}", names.join(", "))]
    InvalidExport { module: String, names: Vec<String> },

    #[error("{at}: '{name}' is already defined in this module")]
    DuplicateSymbol { name: String, at: Location },
}

/// Fatal errors raised while building the goal graph.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("unknown goal '{name}'")]
    UnknownGoal { name: String },

    #[error("goal '{goal}' has cyclic dependencies")]
    CyclicGoal { goal: String },

    #[error("{at}: rule '{rule}' expands into itself")]
    CyclicRule { rule: String, at: Location },
}

/// Errors binding evaluated resources into native rule parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("'{rule}' requires a value for parameter '{param}'")]
    MissingParameter { rule: String, param: String },

    #[error("'{rule}' parameter '{param}' takes a single value, got {count}")]
    Cardinality {
        rule: String,
        param: String,
        count: usize,
    },

    #[error("'{rule}' parameter '{param}' expects a {expected} resource, got {found}")]
    Unconvertible {
        rule: String,
        param: String,
        expected: ResourceKind,
        found: ResourceKind,
    },
}

/// Top-level error for library entry points and the CLI.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
