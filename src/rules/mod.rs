//! Native rules: registry, processor and the built-in executors.
//!
//! The set of built-in rules is closed (`NativeRule`); adding one means a new
//! variant plus its schema. Hosts embedding kiln can register extension
//! specs and hand the `RuleProcessor` a processor for each of them.

pub mod conditional;
pub mod exec;
pub mod files;
pub mod pattern;

use crate::core::binding::{ParamSchema, RuleParameters};
use crate::core::tree::{Arg, Param};
use crate::core::types::{Message, Provenance, Resource, ResourceKind};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Build file declaring the built-in rules, served as module `kiln`.
pub const PRELUDE_MODULE: &str = "kiln";

pub const PRELUDE: &str = "\
# Built-in native rules.
anon glob(pattern: [])
anon files(srcs: [])
anon prebuilt_file(file)
write_file(name, lines: [])
exec(src, work_dir?, arguments: [])
anon on_linux(passthrough: [])
anon on_windows(passthrough: [])
anon on_macos(passthrough: [])
";

/// Platform the build runs on, consulted by conditional rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnv {
    pub os: String,
}

impl Default for HostEnv {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
        }
    }
}

impl HostEnv {
    pub fn new(os: &str) -> Self {
        Self { os: os.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeRule {
    Glob,
    Files,
    PrebuiltFile,
    WriteFile,
    Exec,
    OnLinux,
    OnWindows,
    OnMacos,
}

impl NativeRule {
    pub const ALL: [NativeRule; 8] = [
        Self::Glob,
        Self::Files,
        Self::PrebuiltFile,
        Self::WriteFile,
        Self::Exec,
        Self::OnLinux,
        Self::OnWindows,
        Self::OnMacos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Glob => "glob",
            Self::Files => "files",
            Self::PrebuiltFile => "prebuilt_file",
            Self::WriteFile => "write_file",
            Self::Exec => "exec",
            Self::OnLinux => "on_linux",
            Self::OnWindows => "on_windows",
            Self::OnMacos => "on_macos",
        }
    }

    pub fn schema(self) -> Vec<ParamSchema> {
        use ResourceKind::*;
        match self {
            Self::Glob => vec![ParamSchema::list("pattern", String)],
            Self::Files => vec![ParamSchema::list("srcs", File)],
            Self::PrebuiltFile => vec![ParamSchema::single("file", File)],
            Self::WriteFile => vec![
                ParamSchema::single("name", String),
                ParamSchema::list("lines", String),
            ],
            Self::Exec => vec![
                ParamSchema::single("src", File),
                ParamSchema::optional("work_dir", File),
                ParamSchema::list("arguments", Any),
            ],
            Self::OnLinux | Self::OnWindows | Self::OnMacos => {
                vec![ParamSchema::list("passthrough", Any)]
            }
        }
    }

    /// Operating system a conditional rule is restricted to.
    pub fn platform(self) -> Option<&'static str> {
        match self {
            Self::OnLinux => Some("linux"),
            Self::OnWindows => Some("windows"),
            Self::OnMacos => Some("macos"),
            _ => None,
        }
    }

    fn execute(self, ctx: &ExecutionContext) -> RuleOutput {
        match self {
            Self::Glob => pattern::execute(ctx),
            Self::Files => files::execute_files(ctx),
            Self::PrebuiltFile => files::execute_prebuilt(ctx),
            Self::WriteFile => files::execute_write(ctx),
            Self::Exec => exec::execute(ctx),
            Self::OnLinux | Self::OnWindows | Self::OnMacos => conditional::execute(self, ctx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Builtin(NativeRule),
    /// Registered by the host; executed by a processor it supplies.
    Extension,
}

/// Native rule registered under a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: String,
    pub kind: RuleKind,
    pub params: Vec<ParamSchema>,
    /// Whether results may be replayed from an invocation record instead of
    /// running the rule again.
    pub cached: bool,
}

impl RuleSpec {
    /// Built-ins either read the live filesystem or write to it, so a stored
    /// result could go stale or skip a side effect. They always run.
    pub fn builtin(rule: NativeRule) -> Self {
        Self {
            name: rule.name().to_string(),
            kind: RuleKind::Builtin(rule),
            params: rule.schema(),
            cached: false,
        }
    }

    pub fn extension(name: &str, params: Vec<ParamSchema>) -> Self {
        Self {
            name: name.to_string(),
            kind: RuleKind::Extension,
            params,
            cached: true,
        }
    }

    /// Arguments that are real dependencies of a call; the rest are dropped
    /// from the graph and never evaluated.
    pub fn dependency_args<'a>(&self, args: &'a [Arg], host: &HostEnv) -> Vec<&'a Arg> {
        match self.kind {
            RuleKind::Builtin(rule) => match rule.platform() {
                Some(os) if os != host.os => Vec::new(),
                _ => args.iter().collect(),
            },
            RuleKind::Extension => args.iter().collect(),
        }
    }

    /// Check a build file declaration against the registered schema.
    pub fn check_declaration(&self, params: &[Param]) -> Result<(), String> {
        let declared: Vec<(&str, _)> = params
            .iter()
            .map(|p| (p.name.as_str(), p.cardinality))
            .collect();
        let expected: Vec<(&str, _)> = self
            .params
            .iter()
            .map(|p| (p.name.as_str(), p.cardinality))
            .collect();
        if declared == expected {
            return Ok(());
        }
        let render = |ps: &[(&str, crate::lang::ast::Cardinality)]| {
            ps.iter()
                .map(|(n, c)| format!("{}: {}", n, c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(format!(
            "declared ({}) but the native rule takes ({})",
            render(&declared),
            render(&expected)
        ))
    }
}

/// Everything a native executor gets to see for one call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub spec: Arc<RuleSpec>,
    pub params: RuleParameters,
    /// Qualified name of the goal being built.
    pub goal: String,
    /// Module the call was written in.
    pub module: String,
    pub module_dir: PathBuf,
    /// Output directory owned by the goal.
    pub target_path: PathBuf,
    pub host: HostEnv,
    pub provenance: Arc<Provenance>,
}

/// What a processor hands back for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutput {
    pub result: Result<Vec<Resource>, String>,
    pub messages: Vec<Message>,
}

impl RuleOutput {
    pub fn success(resources: Vec<Resource>) -> Self {
        Self {
            result: Ok(resources),
            messages: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

impl From<Result<Vec<Resource>, String>> for RuleOutput {
    fn from(result: Result<Vec<Resource>, String>) -> Self {
        Self {
            result,
            messages: Vec::new(),
        }
    }
}

/// Runs one bound native rule call.
pub trait Processor: Send + Sync {
    fn process(&self, ctx: &ExecutionContext) -> RuleOutput;

    /// Called once per successful goal after the run, with its resources.
    fn release_resources(&self, _resources: &[Resource]) {}
}

impl<F> Processor for F
where
    F: Fn(&ExecutionContext) -> RuleOutput + Send + Sync,
{
    fn process(&self, ctx: &ExecutionContext) -> RuleOutput {
        self(ctx)
    }
}

/// Name to spec table consulted by the resolver for bodiless rules.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    specs: IndexMap<String, Arc<RuleSpec>>,
}

impl RuleRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for rule in NativeRule::ALL {
            registry
                .specs
                .insert(rule.name().to_string(), Arc::new(RuleSpec::builtin(rule)));
        }
        registry
    }

    pub fn register(&mut self, spec: RuleSpec) -> Result<(), String> {
        if self.specs.contains_key(&spec.name) {
            return Err(format!("native rule '{}' is already registered", spec.name));
        }
        self.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuleSpec>> {
        self.specs.get(name).cloned()
    }
}

/// Default processor: built-ins run in process, extensions are looked up by name.
#[derive(Default, Clone)]
pub struct RuleProcessor {
    extensions: FxHashMap<String, Arc<dyn Processor>>,
}

impl RuleProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, name: &str, processor: Arc<dyn Processor>) -> Self {
        self.extensions.insert(name.to_string(), processor);
        self
    }
}

impl fmt::Debug for RuleProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleProcessor")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Processor for RuleProcessor {
    fn process(&self, ctx: &ExecutionContext) -> RuleOutput {
        match ctx.spec.kind {
            RuleKind::Builtin(rule) => rule.execute(ctx),
            RuleKind::Extension => match self.extensions.get(&ctx.spec.name) {
                Some(processor) => processor.process(ctx),
                None => RuleOutput::failed(format!(
                    "no processor available for rule '{}'",
                    ctx.spec.name
                )),
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::{Location, Value};
    use crate::lang::ast::Cardinality;

    fn arg(name: &str) -> Arg {
        Arg {
            param: name.to_string(),
            value: Arc::new(Value::Str {
                value: "x".to_string(),
                at: Location::default(),
            }),
        }
    }

    #[test]
    fn test_builtin_registry_covers_prelude() {
        let registry = RuleRegistry::builtin();
        let file = crate::lang::parser::parse_build_file(PRELUDE_MODULE, PRELUDE).unwrap();
        assert_eq!(file.definitions.len(), NativeRule::ALL.len());
        for def in &file.definitions {
            let spec = registry.get(&def.name.text).unwrap();
            let params: Vec<Param> = def
                .params
                .iter()
                .map(|p| Param {
                    name: p.name.text.clone(),
                    cardinality: p.cardinality,
                    optional: p.optional,
                })
                .collect();
            spec.check_declaration(&params).unwrap();
        }
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = RuleRegistry::builtin();
        let err = registry
            .register(RuleSpec::extension("glob", vec![]))
            .unwrap_err();
        assert!(err.contains("already registered"));
        registry
            .register(RuleSpec::extension(
                "compile",
                vec![ParamSchema::list("srcs", ResourceKind::Any)],
            ))
            .unwrap();
        assert!(registry.get("compile").is_some());
    }

    #[test]
    fn test_only_extensions_are_cached() {
        for rule in NativeRule::ALL {
            assert!(!RuleSpec::builtin(rule).cached, "{}", rule.name());
        }
        assert!(RuleSpec::extension("compile", vec![]).cached);
    }

    #[test]
    fn test_check_declaration_mismatch() {
        let spec = RuleSpec::builtin(NativeRule::Files);
        let params = vec![Param {
            name: "srcs".to_string(),
            cardinality: Cardinality::Single,
            optional: false,
        }];
        let err = spec.check_declaration(&params).unwrap_err();
        assert!(err.contains("srcs: list"));
    }

    #[test]
    fn test_conditional_pruning() {
        let args = vec![arg("passthrough")];
        let linux = RuleSpec::builtin(NativeRule::OnLinux);
        assert_eq!(linux.dependency_args(&args, &HostEnv::new("linux")).len(), 1);
        assert!(linux.dependency_args(&args, &HostEnv::new("windows")).is_empty());
        let files = RuleSpec::builtin(NativeRule::Files);
        assert_eq!(files.dependency_args(&args, &HostEnv::new("windows")).len(), 1);
    }

    #[test]
    fn test_processor_extension_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_support::context(NativeRule::Files, &[], dir.path(), dir.path());
        ctx.spec = Arc::new(RuleSpec::extension("compile", vec![]));

        let missing = RuleProcessor::new().process(&ctx);
        assert!(missing.result.unwrap_err().contains("no processor"));

        let echo: Arc<dyn Processor> =
            Arc::new(|_: &ExecutionContext| RuleOutput::success(vec![Resource::string("ok", "")]));
        let processor = RuleProcessor::new().with_extension("compile", echo);
        let out = processor.process(&ctx);
        assert_eq!(out.result.unwrap(), vec![Resource::string("ok", "")]);
    }
}
