//! Goal dependency graph with cycle detection.
//!
//! Built by a depth-first walk from the requested goal. Nodes are memoized
//! by goal, so a goal shared by several parents is a single node. Composed
//! rule bodies are walked once per rule; a rule that expands into itself is
//! reported as a cycle as well. Execution order comes from Kahn's algorithm
//! with alphabetical tie-breaking.

use super::error::GraphError;
use super::tree::{GoalId, Location, Program, RuleBody, RuleId, Value};
use crate::rules::HostEnv;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub goal: GoalId,
    /// Direct dependencies, first reference first, without duplicates.
    pub deps: Vec<GoalId>,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub target: GoalId,
    /// Nodes in completion order of the walk: dependencies before dependents.
    pub nodes: IndexMap<GoalId, Node>,
}

impl Graph {
    pub fn node(&self, goal: GoalId) -> Option<&Node> {
        self.nodes.get(&goal)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent index: goal to the goals that depend on it.
    pub fn dependents(&self) -> FxHashMap<GoalId, Vec<GoalId>> {
        let mut index: FxHashMap<GoalId, Vec<GoalId>> = FxHashMap::default();
        for node in self.nodes.values() {
            for dep in &node.deps {
                index.entry(*dep).or_default().push(node.goal);
            }
        }
        index
    }

    /// Scheduling rounds: each round holds the goals whose dependencies all
    /// sit in earlier rounds, sorted by qualified name.
    pub fn waves(&self, program: &Program) -> Vec<Vec<GoalId>> {
        let dependents = self.dependents();
        let mut pending: FxHashMap<GoalId, usize> = self
            .nodes
            .values()
            .map(|n| (n.goal, n.deps.len()))
            .collect();

        let sort = |ids: &mut Vec<GoalId>| {
            ids.sort_by_cached_key(|id| program.goal(*id).qualified_name());
        };
        let mut ready: Vec<GoalId> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| *id)
            .collect();
        sort(&mut ready);

        let mut waves = Vec::new();
        while !ready.is_empty() {
            let mut next = Vec::new();
            for id in &ready {
                pending.remove(id);
                for parent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(count) = pending.get_mut(parent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*parent);
                        }
                    }
                }
            }
            sort(&mut next);
            waves.push(std::mem::replace(&mut ready, next));
        }
        waves
    }

    pub fn execution_order(&self, program: &Program) -> Vec<GoalId> {
        self.waves(program).into_iter().flatten().collect()
    }
}

/// Build the graph for one entry goal: a root goal name or `module.goal`.
pub fn build_graph(program: &Program, host: &HostEnv, name: &str) -> Result<Graph, GraphError> {
    let target = program.find_goal(name).ok_or_else(|| GraphError::UnknownGoal {
        name: name.to_string(),
    })?;
    let mut builder = Builder {
        program,
        host,
        nodes: IndexMap::new(),
        visiting: IndexSet::new(),
        rule_stack: Vec::new(),
        rule_deps: FxHashMap::default(),
    };
    builder.visit(target)?;
    Ok(Graph {
        target,
        nodes: builder.nodes,
    })
}

struct Builder<'a> {
    program: &'a Program,
    host: &'a HostEnv,
    nodes: IndexMap<GoalId, Node>,
    visiting: IndexSet<GoalId>,
    rule_stack: Vec<RuleId>,
    rule_deps: FxHashMap<RuleId, Vec<GoalId>>,
}

impl<'a> Builder<'a> {
    fn visit(&mut self, goal: GoalId) -> Result<(), GraphError> {
        if self.nodes.contains_key(&goal) {
            return Ok(());
        }
        if !self.visiting.insert(goal) {
            return Err(GraphError::CyclicGoal {
                goal: self.program.goal(goal).qualified_name(),
            });
        }
        let program = self.program;
        let mut deps = IndexSet::new();
        self.collect(&program.goal(goal).value, &mut deps)?;
        self.visiting.shift_remove(&goal);
        self.nodes.insert(
            goal,
            Node {
                goal,
                deps: deps.into_iter().collect(),
            },
        );
        Ok(())
    }

    fn collect(&mut self, value: &'a Value, deps: &mut IndexSet<GoalId>) -> Result<(), GraphError> {
        match value {
            Value::Goal { goal, .. } => {
                self.visit(*goal)?;
                deps.insert(*goal);
            }
            Value::List { items, .. } => {
                for item in items {
                    self.collect(item, deps)?;
                }
            }
            Value::RuleCall { rule, args, at } => {
                let program = self.program;
                match &program.rule(*rule).body {
                    RuleBody::Composed(body) => {
                        for dep in self.rule_body_deps(*rule, body, at)? {
                            deps.insert(dep);
                        }
                        for arg in args {
                            self.collect(&arg.value, deps)?;
                        }
                    }
                    RuleBody::Native(spec) => {
                        for arg in spec.dependency_args(args, self.host) {
                            self.collect(&arg.value, deps)?;
                        }
                    }
                }
            }
            Value::Str { .. } | Value::Bool { .. } | Value::Param { .. } => {}
        }
        Ok(())
    }

    /// Goals a composed rule's body references on its own, independent of arguments.
    fn rule_body_deps(
        &mut self,
        rule: RuleId,
        body: &'a Value,
        at: &Location,
    ) -> Result<Vec<GoalId>, GraphError> {
        if let Some(deps) = self.rule_deps.get(&rule) {
            return Ok(deps.clone());
        }
        if self.rule_stack.contains(&rule) {
            return Err(GraphError::CyclicRule {
                rule: self.program.rule(rule).name.clone(),
                at: at.clone(),
            });
        }
        self.rule_stack.push(rule);
        let mut deps = IndexSet::new();
        self.collect(body, &mut deps)?;
        self.rule_stack.pop();
        let deps: Vec<GoalId> = deps.into_iter().collect();
        self.rule_deps.insert(rule, deps.clone());
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::tests::resolve_sources;
    use proptest::prelude::*;

    fn graph(source: &str, goal: &str) -> Result<(Program, Graph), GraphError> {
        let program = resolve_sources(&[("", source)]).unwrap();
        let graph = build_graph(&program, &HostEnv::new("linux"), goal)?;
        Ok((program, graph))
    }

    fn names(program: &Program, ids: &[GoalId]) -> Vec<String> {
        ids.iter().map(|id| program.goal(*id).qualified_name()).collect()
    }

    #[test]
    fn test_cycle_detected() {
        match graph("a = b\nb = a", "a") {
            Err(GraphError::CyclicGoal { goal }) => assert!(goal == "a" || goal == "b"),
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_self_cycle_through_list() {
        assert!(matches!(
            graph("a = ['x', [a]]", "a"),
            Err(GraphError::CyclicGoal { .. })
        ));
    }

    #[test]
    fn test_cycle_through_rule_body() {
        assert!(matches!(
            graph("r(x) = [x, a]\na = r(x = 'y')", "a"),
            Err(GraphError::CyclicGoal { .. })
        ));
    }

    #[test]
    fn test_recursive_rule() {
        match graph("anon r(x) = [r(x)]\na = r('y')", "a") {
            Err(GraphError::CyclicRule { rule, .. }) => assert_eq!(rule, "r"),
            other => panic!("expected rule cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_shared_goal_single_node() {
        let (program, g) = graph("c = 'c'\na = [c]\nb = [c]\ntop = [a, b]", "top").unwrap();
        assert_eq!(g.len(), 4);
        let c = program.find_goal("c").unwrap();
        assert_eq!(g.dependents()[&c].len(), 2);
        assert_eq!(names(&program, &g.node(g.target).unwrap().deps), vec!["a", "b"]);
    }

    #[test]
    fn test_deps_deduplicated() {
        let (program, g) = graph("c = 'c'\ntop = [c, c, [c]]", "top").unwrap();
        assert_eq!(names(&program, &g.node(g.target).unwrap().deps), vec!["c"]);
    }

    #[test]
    fn test_rule_body_and_arguments_contribute() {
        let (program, g) =
            graph("base = 'b'\nextra = 'e'\nr(x) = [base, x]\ntop = r(x = extra)", "top").unwrap();
        assert_eq!(
            names(&program, &g.node(g.target).unwrap().deps),
            vec!["base", "extra"]
        );
    }

    #[test]
    fn test_platform_pruning() {
        let src = "win = 'w'\nlin = 'l'\ntop = [on_windows([win]), on_linux([lin])]";
        let program = resolve_sources(&[("", src)]).unwrap();
        let g = build_graph(&program, &HostEnv::new("linux"), "top").unwrap();
        assert_eq!(names(&program, &g.node(g.target).unwrap().deps), vec!["lin"]);
        assert!(g.node(program.find_goal("win").unwrap()).is_none());

        let g = build_graph(&program, &HostEnv::new("windows"), "top").unwrap();
        assert_eq!(names(&program, &g.node(g.target).unwrap().deps), vec!["win"]);
    }

    #[test]
    fn test_unknown_goal() {
        assert!(matches!(
            graph("a = 'x'", "b"),
            Err(GraphError::UnknownGoal { .. })
        ));
    }

    #[test]
    fn test_qualified_entry_goal() {
        let program = resolve_sources(&[("", "import lib\nx = 'x'"), ("lib", "y = 'y'")]).unwrap();
        let g = build_graph(&program, &HostEnv::default(), "lib.y").unwrap();
        assert_eq!(program.goal(g.target).qualified_name(), "lib.y");
    }

    #[test]
    fn test_waves_alphabetical() {
        let (program, g) = graph("z = 'z'\na = 'a'\nm = [z, a]\ntop = [m, a]", "top").unwrap();
        let waves: Vec<Vec<String>> = g.waves(&program).iter().map(|w| names(&program, w)).collect();
        assert_eq!(waves, vec![vec!["a", "z"], vec!["m"], vec!["top"]]);
    }

    proptest! {
        /// Any acyclic reference pattern yields an order with dependencies first.
        #[test]
        fn prop_execution_order_respects_deps(
            edges in proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), 1..12)
        ) {
            let mut source = String::new();
            for (i, targets) in edges.iter().enumerate() {
                let refs: Vec<String> = if i == 0 {
                    vec![]
                } else {
                    targets.iter().map(|t| format!("g{}", t.index(i))).collect()
                };
                source.push_str(&format!("g{} = [{}]\n", i, refs.join(", ")));
            }
            let top = format!("g{}", edges.len() - 1);
            let (program, g) = graph(&source, &top).unwrap();
            let order = g.execution_order(&program);
            prop_assert_eq!(order.len(), g.len());
            let position: FxHashMap<GoalId, usize> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for node in g.nodes.values() {
                for dep in &node.deps {
                    prop_assert!(position[dep] < position[&node.goal]);
                }
            }
        }
    }
}
