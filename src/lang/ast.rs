//! Parse tree for build files.
//!
//! This is the unresolved form handed to the resolver by a `ModuleLoader`.
//! Names are plain text with their position; nothing is looked up yet.

use std::fmt;

/// Line/column position inside a build file (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An identifier or dotted qualified name with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub text: String,
    pub pos: Pos,
}

impl Name {
    pub fn new(text: impl Into<String>, pos: Pos) -> Self {
        Self {
            text: text.into(),
            pos,
        }
    }
}

/// A whole build file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildFile {
    pub imports: Vec<Name>,
    pub exports: Vec<Name>,
    pub declarations: Vec<GoalDecl>,
    pub definitions: Vec<RuleDecl>,
}

/// `name = value`
#[derive(Debug, Clone, PartialEq)]
pub struct GoalDecl {
    pub name: Name,
    pub value: Expr,
}

/// `[anon] name(params)` or `[anon] name(params) = value`
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDecl {
    pub name: Name,
    pub params: Vec<ParamDecl>,
    /// `None` for native rules.
    pub body: Option<Expr>,
    pub anon: bool,
}

/// Cardinality of a rule parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Single,
    List,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::List => write!(f, "list"),
        }
    }
}

/// `p`, `p?` or `p: []`
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: Name,
    pub cardinality: Cardinality,
    /// List parameters are always optional.
    pub optional: bool,
}

/// Value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str { value: String, pos: Pos },
    Bool { value: bool, pos: Pos },
    List { items: Vec<Expr>, pos: Pos },
    Ref(Name),
    Call { rule: Name, args: Vec<Arg> },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Self::Str { pos, .. } | Self::Bool { pos, .. } | Self::List { pos, .. } => *pos,
            Self::Ref(name) => name.pos,
            Self::Call { rule, .. } => rule.pos,
        }
    }
}

/// A rule call argument; `name` is `None` for the sole unnamed argument form.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<Name>,
    pub value: Expr,
}
