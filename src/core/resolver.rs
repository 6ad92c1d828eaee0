//! Language resolver: parse trees to resolved value trees.
//!
//! Modules are resolved depth first from the root. For each module the
//! resolver registers every goal and rule first, then resolves its imports,
//! then resolves its own expressions, so forward and mutual references work
//! within a module and across circular imports. Any error aborts the whole
//! pass.

use super::error::ResolveError;
use super::symbols::{GlobalTable, ModuleTable};
use super::tree::*;
use crate::lang::ast::{self, Expr};
use crate::lang::loader::{LoadedModule, ModuleLoader};
use crate::rules::{RuleRegistry, PRELUDE_MODULE};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Resolve `root` and everything it imports into a program.
pub fn resolve(
    root: &str,
    loader: &dyn ModuleLoader,
    registry: &RuleRegistry,
) -> Result<Program, ResolveError> {
    let prelude = loader.load(PRELUDE_MODULE)?.is_some();
    let mut resolver = Resolver {
        loader,
        registry,
        prelude,
        symbols: GlobalTable::default(),
        modules: IndexMap::new(),
        goals: Vec::new(),
        rules: Vec::new(),
    };
    resolver.resolve_module(root)?;
    Ok(Program {
        root: root.to_string(),
        goals: resolver.goals,
        rules: resolver.rules,
        modules: resolver.modules,
        symbols: resolver.symbols,
    })
}

struct Resolver<'a> {
    loader: &'a dyn ModuleLoader,
    registry: &'a RuleRegistry,
    /// Whether the built-in module exists and is implicitly imported.
    prelude: bool,
    symbols: GlobalTable,
    modules: IndexMap<String, ModuleInfo>,
    goals: Vec<Goal>,
    rules: Vec<Rule>,
}

fn placeholder(at: Location) -> Arc<Value> {
    Arc::new(Value::List {
        items: Vec::new(),
        at,
    })
}

impl Resolver<'_> {
    fn resolve_module(&mut self, name: &str) -> Result<(), ResolveError> {
        // Registered modules are either finished or further up the stack.
        if self.symbols.contains(name) {
            return Ok(());
        }
        let LoadedModule { name, dir, file } =
            self.loader
                .load(name)?
                .ok_or_else(|| ResolveError::ModuleNotFound {
                    module: name.to_string(),
                })?;

        let exports: IndexSet<String> = file.exports.iter().map(|n| n.text.clone()).collect();
        let mut imports: Vec<String> = Vec::new();
        for import in &file.imports {
            if !imports.contains(&import.text) {
                imports.push(import.text.clone());
            }
        }
        if self.prelude && name != PRELUDE_MODULE && !imports.iter().any(|i| i == PRELUDE_MODULE) {
            imports.push(PRELUDE_MODULE.to_string());
        }
        let mut table = ModuleTable::new(&name, exports, imports.clone());

        let mut goal_ids = Vec::with_capacity(file.declarations.len());
        for decl in &file.declarations {
            let at = Location::new(&name, decl.name.pos);
            let id = GoalId(self.goals.len());
            table.define_goal(&decl.name.text, id, &at)?;
            self.goals.push(Goal {
                name: decl.name.text.clone(),
                module: name.clone(),
                pos: decl.name.pos,
                value: placeholder(at),
            });
            goal_ids.push(id);
        }

        let mut rule_ids = Vec::with_capacity(file.definitions.len());
        for def in &file.definitions {
            let at = Location::new(&name, def.name.pos);
            let id = RuleId(self.rules.len());
            table.define_rule(&def.name.text, id, &at)?;
            let rule = self.register_rule(&name, def, at)?;
            self.rules.push(rule);
            rule_ids.push(id);
        }

        let undefined = table.undefined_exports();
        if !undefined.is_empty() {
            return Err(ResolveError::InvalidExport {
                module: name,
                names: undefined,
            });
        }

        self.symbols.insert(table);
        self.modules.insert(
            name.clone(),
            ModuleInfo {
                name: name.clone(),
                dir,
                imports: imports.clone(),
            },
        );

        for import in &imports {
            self.resolve_module(import)?;
        }

        for (decl, id) in file.declarations.iter().zip(goal_ids) {
            let value = self.resolve_expr(&name, &decl.value, None, true)?;
            self.goals[id.0].value = value;
        }
        for (def, id) in file.definitions.iter().zip(rule_ids) {
            if let Some(body) = &def.body {
                let rule = &self.rules[id.0];
                let value =
                    self.resolve_expr(&name, body, Some(rule.params.as_slice()), !rule.anon)?;
                self.rules[id.0].body = RuleBody::Composed(value);
            }
        }
        Ok(())
    }

    /// Rule with its parameters checked; composed bodies are filled in later.
    fn register_rule(
        &self,
        module: &str,
        def: &ast::RuleDecl,
        at: Location,
    ) -> Result<Rule, ResolveError> {
        let mut params: Vec<Param> = Vec::with_capacity(def.params.len());
        for p in &def.params {
            if params.iter().any(|existing| existing.name == p.name.text) {
                return Err(ResolveError::InvalidParameter {
                    rule: def.name.text.clone(),
                    message: format!("parameter '{}' is declared twice", p.name.text),
                    at: Location::new(module, p.name.pos),
                });
            }
            params.push(Param {
                name: p.name.text.clone(),
                cardinality: p.cardinality,
                optional: p.optional,
            });
        }

        let body = match def.body {
            Some(_) => RuleBody::Composed(placeholder(at.clone())),
            None => {
                let spec = self.registry.get(&def.name.text).ok_or_else(|| {
                    ResolveError::UnsupportedRule {
                        rule: def.name.text.clone(),
                        at: at.clone(),
                    }
                })?;
                spec.check_declaration(&params)
                    .map_err(|message| ResolveError::InvalidParameter {
                        rule: def.name.text.clone(),
                        message,
                        at: at.clone(),
                    })?;
                RuleBody::Native(spec)
            }
        };

        Ok(Rule {
            name: def.name.text.clone(),
            module: module.to_string(),
            pos: def.name.pos,
            params,
            anon: def.anon,
            body,
        })
    }

    fn resolve_expr(
        &self,
        module: &str,
        expr: &Expr,
        params: Option<&[Param]>,
        allow_non_anonymous: bool,
    ) -> Result<Arc<Value>, ResolveError> {
        let at = Location::new(module, expr.pos());
        let value = match expr {
            Expr::Str { value, .. } => Value::Str {
                value: value.clone(),
                at,
            },
            Expr::Bool { value, .. } => Value::Bool { value: *value, at },
            Expr::List { items, .. } => Value::List {
                items: items
                    .iter()
                    .map(|item| self.resolve_expr(module, item, params, false))
                    .collect::<Result<_, _>>()?,
                at,
            },
            Expr::Ref(name) => {
                let is_param = params
                    .map(|ps| ps.iter().any(|p| p.name == name.text))
                    .unwrap_or(false);
                if is_param {
                    Value::Param {
                        name: name.text.clone(),
                        at,
                    }
                } else {
                    let goal = self.symbols.lookup_goal(module, &name.text, &at)?;
                    Value::Goal { goal, at }
                }
            }
            Expr::Call { rule, args } => {
                let id = self.symbols.lookup_rule(module, &rule.text, &at)?;
                let target = &self.rules[id.0];
                if !target.anon && !allow_non_anonymous {
                    return Err(ResolveError::IllegalRuleCall {
                        rule: rule.text.clone(),
                        at,
                    });
                }
                let args = self.resolve_args(module, target, args, params, allow_non_anonymous, &at)?;
                Value::RuleCall { rule: id, args, at }
            }
        };
        Ok(Arc::new(value))
    }

    fn resolve_args(
        &self,
        module: &str,
        target: &Rule,
        args: &[ast::Arg],
        params: Option<&[Param]>,
        allow_non_anonymous: bool,
        at: &Location,
    ) -> Result<Vec<Arg>, ResolveError> {
        let invalid = |message: String| ResolveError::InvalidParameter {
            rule: target.name.clone(),
            message,
            at: at.clone(),
        };

        if let [ast::Arg { name: None, value }] = args {
            if target.params.len() != 1 {
                return Err(invalid(format!(
                    "an unnamed argument needs exactly one parameter, '{}' has {}",
                    target.name,
                    target.params.len()
                )));
            }
            let value = self.resolve_expr(module, value, params, allow_non_anonymous)?;
            return Ok(vec![Arg {
                param: target.params[0].name.clone(),
                value,
            }]);
        }

        let mut resolved: Vec<(usize, Arg)> = Vec::with_capacity(args.len());
        for arg in args {
            let name = match &arg.name {
                Some(name) => name,
                None => return Err(invalid("all arguments must be named".to_string())),
            };
            let index = target
                .params
                .iter()
                .position(|p| p.name == name.text)
                .ok_or_else(|| invalid(format!("unknown parameter '{}'", name.text)))?;
            if resolved.iter().any(|(i, _)| *i == index) {
                return Err(invalid(format!("parameter '{}' given more than once", name.text)));
            }
            let value = self.resolve_expr(module, &arg.value, params, false)?;
            resolved.push((
                index,
                Arg {
                    param: name.text.clone(),
                    value,
                },
            ));
        }

        resolved.sort_by_key(|(i, _)| *i);
        Ok(resolved.into_iter().map(|(_, arg)| arg).collect())
    }
}
