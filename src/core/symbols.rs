//! Symbol tables.
//!
//! `ModuleTable` holds every goal and rule one module defines, private ones
//! included, plus its export set and imports. `GlobalTable` owns all module
//! tables and answers lookups from the point of view of one module: the
//! module itself first, then the exported symbols of its imports in
//! declaration order (transitively, each module visited once).

use super::error::ResolveError;
use super::tree::{GoalId, Location, RuleId};
use indexmap::{IndexMap, IndexSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Goal(GoalId),
    Rule(RuleId),
}

#[derive(Debug, Clone, Copy)]
enum SymbolKind {
    Goal,
    Rule,
}

impl Symbol {
    fn of_kind(self, kind: SymbolKind) -> Option<Symbol> {
        match (self, kind) {
            (Symbol::Goal(_), SymbolKind::Goal) | (Symbol::Rule(_), SymbolKind::Rule) => {
                Some(self)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    name: String,
    symbols: IndexMap<String, Symbol>,
    /// Empty means everything is exported.
    exports: IndexSet<String>,
    imports: Vec<String>,
}

impl ModuleTable {
    pub fn new(name: &str, exports: IndexSet<String>, imports: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            symbols: IndexMap::new(),
            exports,
            imports,
        }
    }

    pub fn define_goal(&mut self, name: &str, id: GoalId, at: &Location) -> Result<(), ResolveError> {
        self.define(name, Symbol::Goal(id), at)
    }

    pub fn define_rule(&mut self, name: &str, id: RuleId, at: &Location) -> Result<(), ResolveError> {
        self.define(name, Symbol::Rule(id), at)
    }

    fn define(&mut self, name: &str, symbol: Symbol, at: &Location) -> Result<(), ResolveError> {
        if self.symbols.contains_key(name) {
            return Err(ResolveError::DuplicateSymbol {
                name: name.to_string(),
                at: at.clone(),
            });
        }
        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    pub fn is_exported(&self, name: &str) -> bool {
        self.symbols.contains_key(name) && (self.exports.is_empty() || self.exports.contains(name))
    }

    /// Export names with no matching definition.
    pub fn undefined_exports(&self) -> Vec<String> {
        self.exports
            .iter()
            .filter(|name| !self.symbols.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn goal(&self, name: &str) -> Option<GoalId> {
        match self.symbols.get(name) {
            Some(Symbol::Goal(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn rule(&self, name: &str) -> Option<RuleId> {
        match self.symbols.get(name) {
            Some(Symbol::Rule(id)) => Some(*id),
            _ => None,
        }
    }

    /// Goals in definition order.
    pub fn goals(&self) -> impl Iterator<Item = GoalId> + '_ {
        self.symbols.values().filter_map(|s| match s {
            Symbol::Goal(id) => Some(*id),
            Symbol::Rule(_) => None,
        })
    }

    fn lookup(&self, name: &str, kind: SymbolKind, private: bool) -> Option<Symbol> {
        let symbol = self.symbols.get(name)?.of_kind(kind)?;
        if private || self.is_exported(name) {
            Some(symbol)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlobalTable {
    modules: IndexMap<String, ModuleTable>,
}

impl GlobalTable {
    pub fn insert(&mut self, table: ModuleTable) {
        self.modules.insert(table.name.clone(), table);
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleTable> {
        self.modules.get(name)
    }

    /// Imported modules reachable from `from`, in declaration order, each once.
    pub fn visible_imports<'a>(&'a self, from: &'a str) -> Vec<&'a str> {
        let mut seen: IndexSet<&'a str> = IndexSet::new();
        seen.insert(from);
        let mut queue: Vec<&'a str> = vec![from];
        let mut i = 0;
        while i < queue.len() {
            if let Some(table) = self.modules.get(queue[i]) {
                for import in &table.imports {
                    if seen.insert(import.as_str()) {
                        queue.push(import.as_str());
                    }
                }
            }
            i += 1;
        }
        queue.into_iter().skip(1).collect()
    }

    pub fn lookup_goal(&self, from: &str, name: &str, at: &Location) -> Result<GoalId, ResolveError> {
        match self.lookup(from, name, SymbolKind::Goal, at)? {
            Some(Symbol::Goal(id)) => Ok(id),
            _ => Err(ResolveError::UnknownGoal {
                name: name.to_string(),
                at: at.clone(),
            }),
        }
    }

    pub fn lookup_rule(&self, from: &str, name: &str, at: &Location) -> Result<RuleId, ResolveError> {
        match self.lookup(from, name, SymbolKind::Rule, at)? {
            Some(Symbol::Rule(id)) => Ok(id),
            _ => Err(ResolveError::UnknownRule {
                name: name.to_string(),
                at: at.clone(),
            }),
        }
    }

    fn lookup(
        &self,
        from: &str,
        name: &str,
        kind: SymbolKind,
        at: &Location,
    ) -> Result<Option<Symbol>, ResolveError> {
        if let Some((module, local)) = name.rsplit_once('.') {
            return Ok(self
                .modules
                .get(module)
                .and_then(|t| t.lookup(local, kind, module == from)));
        }

        if let Some(symbol) = self.modules.get(from).and_then(|t| t.lookup(name, kind, true)) {
            return Ok(Some(symbol));
        }

        let mut found: Vec<(&str, Symbol)> = Vec::new();
        for module in self.visible_imports(from) {
            if let Some(symbol) = self.modules.get(module).and_then(|t| t.lookup(name, kind, false)) {
                found.push((module, symbol));
            }
        }
        match found.len() {
            0 => Ok(None),
            1 => Ok(Some(found[0].1)),
            _ => {
                let modules = found.iter().map(|(m, _)| m.to_string()).collect();
                Err(match kind {
                    SymbolKind::Goal => ResolveError::AmbiguousGoal {
                        name: name.to_string(),
                        modules,
                        at: at.clone(),
                    },
                    SymbolKind::Rule => ResolveError::AmbiguousRule {
                        name: name.to_string(),
                        modules,
                        at: at.clone(),
                    },
                })
            }
        }
    }
}
