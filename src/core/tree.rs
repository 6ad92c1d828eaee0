//! Resolved value trees and the resolved program.
//!
//! A `Program` owns every goal and rule of a build in two arenas indexed by
//! `GoalId`/`RuleId`. Trees reference goals and rules by id, so sharing a
//! goal between several parents never duplicates it. Everything here is
//! immutable once the resolver hands the program out.

use super::symbols::GlobalTable;
use crate::lang::ast::{Cardinality, Pos};
use crate::rules::RuleSpec;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Module name plus position; the root module has the empty name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub module: String,
    pub pos: Pos,
}

impl Location {
    pub fn new(module: &str, pos: Pos) -> Self {
        Self {
            module: module.to_string(),
            pos,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            write!(f, "<root>:{}", self.pos)
        } else {
            write!(f, "{}:{}", self.module, self.pos)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoalId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub usize);

/// Resolved value tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    RuleCall {
        rule: RuleId,
        args: Vec<Arg>,
        at: Location,
    },
    Str {
        value: String,
        at: Location,
    },
    Bool {
        value: bool,
        at: Location,
    },
    List {
        items: Vec<Arc<Value>>,
        at: Location,
    },
    Goal {
        goal: GoalId,
        at: Location,
    },
    /// Slot of the enclosing composed rule's parameter list.
    Param {
        name: String,
        at: Location,
    },
}

/// Rule call argument, always keyed by the parameter it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub param: String,
    pub value: Arc<Value>,
}

#[derive(Debug, Clone)]
pub struct Goal {
    pub name: String,
    pub module: String,
    pub pos: Pos,
    pub value: Arc<Value>,
}

impl Goal {
    /// `module.goal`, or just `goal` in the root module.
    pub fn qualified_name(&self) -> String {
        qualify(&self.module, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub cardinality: Cardinality,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub enum RuleBody {
    Composed(Arc<Value>),
    Native(Arc<RuleSpec>),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub module: String,
    pub pos: Pos,
    pub params: Vec<Param>,
    pub anon: bool,
    pub body: RuleBody,
}

/// A loaded module: where it lives and what it shows to importers.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    /// Directory relative string paths of this module resolve against.
    pub dir: PathBuf,
    pub imports: Vec<String>,
}

/// The fully resolved build.
#[derive(Debug)]
pub struct Program {
    pub root: String,
    pub goals: Vec<Goal>,
    pub rules: Vec<Rule>,
    pub modules: IndexMap<String, ModuleInfo>,
    pub symbols: GlobalTable,
}

impl Program {
    pub fn goal(&self, id: GoalId) -> &Goal {
        &self.goals[id.0]
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    /// Goals declared by the root module, in declaration order.
    pub fn exposed_goals(&self) -> Vec<GoalId> {
        self.symbols
            .module(&self.root)
            .map(|table| table.goals().collect())
            .unwrap_or_default()
    }

    /// Find an entry goal: a root goal by plain name, or any exported goal as `module.goal`.
    pub fn find_goal(&self, name: &str) -> Option<GoalId> {
        let root = self.symbols.module(&self.root)?;
        if let Some(id) = root.goal(name) {
            return Some(id);
        }
        let (module, goal) = name.rsplit_once('.')?;
        let table = self.symbols.module(module)?;
        if module == self.root || table.is_exported(goal) {
            table.goal(goal)
        } else {
            None
        }
    }
}

pub fn qualify(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", module, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new("", Pos::new(3, 7)).to_string(), "<root>:3:7");
        assert_eq!(
            Location::new("lib.util", Pos::new(1, 1)).to_string(),
            "lib.util:1:1"
        );
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "top"), "top");
        assert_eq!(qualify("lib", "top"), "lib.top");
    }
}
