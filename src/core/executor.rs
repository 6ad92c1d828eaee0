//! Goal execution engine.
//!
//! Every graph node gets one task, spawned in Kahn order so a task only
//! starts once the tasks of all its dependencies exist. A goal task
//! interprets the goal's value tree; list elements and rule arguments run as
//! sub-tasks and are joined in declaration order. Native rule calls go
//! through the invocation cache and run on the blocking pool. Failures never
//! abort the run: they travel as `Failed` values to whoever consumes them.

use super::binding::bind;
use super::config::Settings;
use super::error::{BindingError, KilnError};
use super::fingerprint::{Fingerprint, FingerprintMode};
use super::graph::Graph;
use super::state::{record_path, target_path, InvocationRecord, RecordStore};
use super::tree::{Arg, GoalId, Location, Program, Rule, RuleBody, RuleId, Value};
use super::types::*;
use crate::provenance::eventlog::EventLog;
use crate::rules::{ExecutionContext, HostEnv, Processor, RuleOutput, RuleSpec};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub jobs: usize,
    pub out_dir: PathBuf,
    pub fingerprint: FingerprintMode,
    pub host: HostEnv,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings, project_dir: &Path) -> Self {
        Self {
            jobs: settings.jobs(),
            out_dir: settings.out_dir(project_dir),
            fingerprint: settings.fingerprint,
            host: HostEnv::default(),
        }
    }
}

/// Outcome of one build run.
#[derive(Debug)]
pub struct BuildReport {
    pub target: GoalId,
    /// Per-goal results in scheduling order.
    pub results: IndexMap<GoalId, RuleResult>,
    pub rules_executed: u32,
    pub rules_cached: u32,
    pub duration: Duration,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.results.values().all(RuleResult::is_success)
    }

    pub fn target_result(&self) -> Option<&RuleResult> {
        self.results.get(&self.target)
    }

    pub fn failures(&self) -> Vec<(GoalId, &Failure)> {
        self.results
            .iter()
            .filter_map(|(id, r)| match r {
                RuleResult::Failed(f) => Some((*id, f)),
                RuleResult::Success(_) => None,
            })
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

pub struct Engine {
    program: Arc<Program>,
    processor: Arc<dyn Processor>,
    store: Arc<dyn RecordStore>,
    events: Option<Arc<EventLog>>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        program: Arc<Program>,
        processor: Arc<dyn Processor>,
        store: Arc<dyn RecordStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            program,
            processor,
            store,
            events: None,
            options,
        }
    }

    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the graph on a dedicated runtime sized by `jobs`.
    pub fn run(&self, graph: &Graph) -> Result<BuildReport, KilnError> {
        let jobs = self.options.jobs.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(jobs)
            .max_blocking_threads(jobs)
            .thread_name("kiln-worker")
            .build()
            .map_err(|e| KilnError::Runtime(format!("cannot start worker pool: {}", e)))?;
        Ok(runtime.block_on(self.execute(graph)))
    }

    /// Run the graph on the current runtime.
    pub async fn execute(&self, graph: &Graph) -> BuildReport {
        let started = Instant::now();
        let order = graph.execution_order(&self.program);
        let target_name = self.program.goal(graph.target).qualified_name();
        if let Some(events) = &self.events {
            events.emit(BuildEvent::BuildStarted {
                run_id: events.run_id().to_string(),
                goal: target_name,
                kiln_version: env!("CARGO_PKG_VERSION").to_string(),
            });
        }

        let mut senders = FxHashMap::default();
        let mut tasks = FxHashMap::default();
        for id in &order {
            let (tx, rx) = watch::channel(None);
            senders.insert(*id, tx);
            tasks.insert(*id, TaskHandle { rx });
        }
        let shared = Arc::new(Shared {
            program: self.program.clone(),
            processor: self.processor.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            out_dir: self.options.out_dir.clone(),
            fingerprint: self.options.fingerprint,
            host: self.options.host.clone(),
            tasks,
            executed: AtomicU32::new(0),
            cached: AtomicU32::new(0),
        });

        let mut handles = Vec::with_capacity(order.len());
        for id in order {
            if let Some(tx) = senders.remove(&id) {
                handles.push((id, tokio::spawn(run_goal(shared.clone(), id, tx))));
            }
        }

        let mut results = IndexMap::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => RuleResult::failed(format!("goal task aborted: {}", e)),
            };
            results.insert(id, result);
        }
        for result in results.values() {
            if let RuleResult::Success(resources) = result {
                self.processor.release_resources(resources);
            }
        }

        let report = BuildReport {
            target: graph.target,
            rules_executed: shared.executed.load(Ordering::Relaxed),
            rules_cached: shared.cached.load(Ordering::Relaxed),
            duration: started.elapsed(),
            results,
        };
        if let Some(events) = &self.events {
            let failed = report.failures().len();
            events.emit(BuildEvent::BuildCompleted {
                run_id: events.run_id().to_string(),
                goals_succeeded: u32::try_from(report.results.len() - failed).unwrap_or(u32::MAX),
                goals_failed: u32::try_from(failed).unwrap_or(u32::MAX),
                rules_executed: report.rules_executed,
                rules_cached: report.rules_cached,
                total_seconds: report.duration.as_secs_f64(),
            });
        }
        report
    }
}

/// State shared by all tasks of one run; read-only apart from the counters.
struct Shared {
    program: Arc<Program>,
    processor: Arc<dyn Processor>,
    store: Arc<dyn RecordStore>,
    events: Option<Arc<EventLog>>,
    out_dir: PathBuf,
    fingerprint: FingerprintMode,
    host: HostEnv,
    tasks: FxHashMap<GoalId, TaskHandle>,
    executed: AtomicU32,
    cached: AtomicU32,
}

impl Shared {
    fn emit(&self, event: BuildEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Cache check, execution and record update for one native call.
    /// Runs on the blocking pool. Rules without a cache policy always run
    /// and leave no record.
    fn invoke(&self, ctx: ExecutionContext, key: &Path) -> Result<Vec<Resource>, String> {
        if !ctx.spec.cached {
            let (result, _) = self.run(&ctx);
            return result;
        }

        let fingerprint = Fingerprint::of(&ctx.params, self.fingerprint);
        if let Some(record) = self.store.read(key) {
            let replayable = record.fingerprint == fingerprint
                && record.result.iter().all(ResourceInfo::is_present);
            if replayable {
                self.cached.fetch_add(1, Ordering::Relaxed);
                report_messages(&ctx, &record.messages);
                self.emit(BuildEvent::RuleCached {
                    goal: ctx.goal.clone(),
                    rule: ctx.spec.name.clone(),
                });
                return Ok(record
                    .result
                    .into_iter()
                    .map(|info| info.into_resource(Some(ctx.provenance.clone())))
                    .collect());
            }
        }

        let (result, messages) = self.run(&ctx);
        let resources = result?;
        let record = InvocationRecord::new(
            &ctx.spec.name,
            &ctx.goal,
            fingerprint,
            &resources,
            messages,
        );
        if let Err(e) = self.store.write(key, &record) {
            eprintln!("warning: cannot save invocation record: {}", e);
        }
        Ok(resources)
    }

    /// Run the processor, report its messages and stamp provenance on what
    /// it returns.
    fn run(&self, ctx: &ExecutionContext) -> (Result<Vec<Resource>, String>, Vec<Message>) {
        let started = Instant::now();
        let RuleOutput { result, messages } = self.processor.process(ctx);
        self.executed.fetch_add(1, Ordering::Relaxed);
        report_messages(ctx, &messages);
        self.emit(BuildEvent::RuleExecuted {
            goal: ctx.goal.clone(),
            rule: ctx.spec.name.clone(),
            success: result.is_ok(),
            duration_seconds: started.elapsed().as_secs_f64(),
        });

        let result = result.map(|resources| {
            resources
                .into_iter()
                .map(|r| match r.provenance() {
                    Some(_) => r,
                    None => r.with_provenance(ctx.provenance.clone()),
                })
                .collect()
        });
        (result, messages)
    }
}

fn report_messages(ctx: &ExecutionContext, messages: &[Message]) {
    for message in messages {
        match message.level {
            MessageLevel::Info => println!("[{}] {}: {}", ctx.goal, ctx.spec.name, message.text),
            level => eprintln!("[{}] {} {}: {}", ctx.goal, ctx.spec.name, level, message.text),
        }
    }
}

/// Join side of a goal task; any number of consumers may wait on it.
struct TaskHandle {
    rx: watch::Receiver<Option<RuleResult>>,
}

impl TaskHandle {
    async fn join(&self) -> RuleResult {
        let mut rx = self.rx.clone();
        let published = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => return RuleResult::failed("goal task ended without a result"),
        };
        published.unwrap_or_else(|| RuleResult::failed("goal task published no result"))
    }
}

async fn run_goal(
    shared: Arc<Shared>,
    id: GoalId,
    tx: watch::Sender<Option<RuleResult>>,
) -> RuleResult {
    let goal = shared.program.goal(id);
    let name = goal.qualified_name();
    let value = goal.value.clone();
    shared.emit(BuildEvent::GoalStarted { goal: name.clone() });

    let started = Instant::now();
    let result = eval(shared.clone(), value, Env::root(id)).await;
    match &result {
        RuleResult::Success(resources) => shared.emit(BuildEvent::GoalCompleted {
            goal: name,
            resources: resources.len(),
            duration_seconds: started.elapsed().as_secs_f64(),
        }),
        RuleResult::Failed(failure) => shared.emit(BuildEvent::GoalFailed {
            goal: name,
            error: failure.message.clone(),
        }),
    }
    tx.send_replace(Some(result.clone()));
    result
}

/// One rule call on the evaluation stack.
#[derive(Debug)]
struct Frame {
    rule: String,
    at: Location,
    parent: Option<Arc<Frame>>,
}

impl Frame {
    /// Innermost call first.
    fn trace(self: &Arc<Self>) -> Vec<TraceEntry> {
        let mut entries = Vec::new();
        let mut frame = Some(self);
        while let Some(f) = frame {
            entries.push(TraceEntry {
                rule: f.rule.clone(),
                at: f.at.clone(),
            });
            frame = f.parent.as_ref();
        }
        entries
    }

    /// Outermost call first, as `rule@location`.
    fn chain(self: &Arc<Self>) -> Vec<String> {
        let mut chain: Vec<String> = self
            .trace()
            .into_iter()
            .map(|e| format!("{}@{}", e.rule, e.at))
            .collect();
        chain.reverse();
        chain
    }
}

/// Evaluation environment: never mutated, extended by building a new one.
#[derive(Clone)]
struct Env {
    goal: GoalId,
    bindings: Arc<FxHashMap<String, RuleResult>>,
    frame: Option<Arc<Frame>>,
}

impl Env {
    fn root(goal: GoalId) -> Self {
        Self {
            goal,
            bindings: Arc::new(FxHashMap::default()),
            frame: None,
        }
    }

    fn fail(&self, message: impl Into<String>) -> RuleResult {
        RuleResult::Failed(Failure {
            message: message.into(),
            trace: self.frame.as_ref().map(Frame::trace).unwrap_or_default(),
        })
    }
}

type EvalFuture = Pin<Box<dyn Future<Output = RuleResult> + Send>>;

fn eval(shared: Arc<Shared>, value: Arc<Value>, env: Env) -> EvalFuture {
    Box::pin(async move {
        match value.as_ref() {
            Value::Str { value, at } => RuleResult::Success(vec![Resource::string(value.clone(), &at.module)]),
            Value::Bool { value, .. } => RuleResult::Success(vec![Resource::bool(*value)]),
            Value::List { items, .. } => eval_list(&shared, items, &env).await,
            Value::Goal { goal, .. } => match shared.tasks.get(goal) {
                Some(task) => task.join().await,
                None => env.fail(format!(
                    "goal '{}' has no scheduled task",
                    shared.program.goal(*goal).qualified_name()
                )),
            },
            Value::Param { name, .. } => match env.bindings.get(name) {
                Some(result) => result.clone(),
                None => env.fail(format!("parameter '{}' is not bound", name)),
            },
            Value::RuleCall { rule, args, at } => eval_call(&shared, *rule, args, at, &env).await,
        }
    })
}

async fn join_task(handle: JoinHandle<RuleResult>, env: &Env) -> RuleResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => env.fail(format!("evaluation task aborted: {}", e)),
    }
}

async fn eval_list(shared: &Arc<Shared>, items: &[Arc<Value>], env: &Env) -> RuleResult {
    let handles: Vec<JoinHandle<RuleResult>> = items
        .iter()
        .map(|item| tokio::spawn(eval(shared.clone(), item.clone(), env.clone())))
        .collect();
    let mut resources = Vec::new();
    let mut failure = None;
    for handle in handles {
        match join_task(handle, env).await {
            RuleResult::Success(r) => resources.extend(r),
            RuleResult::Failed(f) => {
                failure.get_or_insert(f);
            }
        }
    }
    match failure {
        Some(f) => RuleResult::Failed(f),
        None => RuleResult::Success(resources),
    }
}

enum Pending {
    Ready(RuleResult),
    Task(JoinHandle<RuleResult>),
}

async fn eval_call(
    shared: &Arc<Shared>,
    id: RuleId,
    args: &[Arg],
    at: &Location,
    env: &Env,
) -> RuleResult {
    let rule = shared.program.rule(id);
    let evaluated: Vec<&Arg> = match &rule.body {
        RuleBody::Native(spec) => spec.dependency_args(args, &shared.host),
        RuleBody::Composed(_) => args.iter().collect(),
    };

    let mut pending = Vec::with_capacity(evaluated.len());
    for arg in evaluated {
        // A parameter passed straight through is already evaluated.
        let bound = match arg.value.as_ref() {
            Value::Param { name, .. } => env.bindings.get(name).cloned(),
            _ => None,
        };
        let p = match bound {
            Some(result) => Pending::Ready(result),
            None => Pending::Task(tokio::spawn(eval(
                shared.clone(),
                arg.value.clone(),
                env.clone(),
            ))),
        };
        pending.push((arg.param.clone(), p));
    }

    let mut bindings: FxHashMap<String, RuleResult> = FxHashMap::default();
    let mut failure = None;
    for (param, p) in pending {
        let result = match p {
            Pending::Ready(result) => result,
            Pending::Task(handle) => join_task(handle, env).await,
        };
        if let RuleResult::Failed(f) = &result {
            failure.get_or_insert_with(|| f.clone());
        }
        bindings.insert(param, result);
    }
    if let Some(f) = failure {
        return RuleResult::Failed(f);
    }

    let frame = Arc::new(Frame {
        rule: rule.name.clone(),
        at: at.clone(),
        parent: env.frame.clone(),
    });
    match &rule.body {
        RuleBody::Composed(body) => {
            for param in &rule.params {
                if bindings.contains_key(&param.name) {
                    continue;
                }
                if !param.optional {
                    let missing = BindingError::MissingParameter {
                        rule: rule.name.clone(),
                        param: param.name.clone(),
                    };
                    return RuleResult::Failed(Failure {
                        message: missing.to_string(),
                        trace: frame.trace(),
                    });
                }
                bindings.insert(param.name.clone(), RuleResult::Success(Vec::new()));
            }
            let inner = Env {
                goal: env.goal,
                bindings: Arc::new(bindings),
                frame: Some(frame),
            };
            eval(shared.clone(), body.clone(), inner).await
        }
        RuleBody::Native(spec) => call_native(shared, spec.clone(), rule, bindings, frame, env.goal).await,
    }
}

async fn call_native(
    shared: &Arc<Shared>,
    spec: Arc<RuleSpec>,
    rule: &Rule,
    bindings: FxHashMap<String, RuleResult>,
    frame: Arc<Frame>,
    goal: GoalId,
) -> RuleResult {
    let trace = frame.trace();
    let call_site = frame.at.clone();
    let module_dir = shared
        .program
        .module(&call_site.module)
        .map(|m| m.dir.clone())
        .unwrap_or_default();
    let values: IndexMap<String, Vec<Resource>> = bindings
        .into_iter()
        .map(|(name, result)| (name, result.resources().to_vec()))
        .collect();
    let params = match bind(&spec.name, &spec.params, &values, &module_dir) {
        Ok(params) => params,
        Err(e) => {
            return RuleResult::Failed(Failure {
                message: e.to_string(),
                trace,
            })
        }
    };

    let goal = shared.program.goal(goal);
    let goal_name = goal.qualified_name();
    let target = target_path(&shared.out_dir, &goal.module, &goal.name);
    let key = record_path(&target, &spec.name, &frame.chain());
    let ctx = ExecutionContext {
        provenance: Arc::new(Provenance {
            rule: rule.name.clone(),
            goal: goal_name.clone(),
            at: call_site.clone(),
        }),
        spec,
        params,
        goal: goal_name,
        module: call_site.module,
        module_dir,
        target_path: target,
        host: shared.host.clone(),
    };

    let worker = shared.clone();
    match tokio::task::spawn_blocking(move || worker.invoke(ctx, &key)).await {
        Ok(Ok(resources)) => RuleResult::Success(resources),
        Ok(Err(message)) => RuleResult::Failed(Failure { message, trace }),
        Err(e) => RuleResult::Failed(Failure {
            message: format!("rule '{}' panicked: {}", rule.name, e),
            trace,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binding::ParamSchema;
    use crate::core::graph::build_graph;
    use crate::core::resolver::{resolve, tests::test_registry};
    use crate::core::state::{FsRecordStore, MemoryRecordStore};
    use crate::lang::loader::{ChainLoader, MemoryModuleLoader, SystemModuleLoader};
    use crate::rules::{RuleProcessor, RuleRegistry};
    use std::sync::atomic::AtomicUsize;

    /// `compile` echoes its inputs and fails on the string "boom";
    /// `delay(ms)` sleeps then returns its argument; `stamp(name)` writes
    /// `<target>/<name>` and returns it.
    struct Harness {
        compile_calls: Arc<AtomicUsize>,
        stamp_calls: Arc<AtomicUsize>,
        processor: Arc<dyn Processor>,
    }

    fn harness() -> Harness {
        let compile_calls = Arc::new(AtomicUsize::new(0));
        let counter = compile_calls.clone();
        let compile: Arc<dyn Processor> = Arc::new(move |ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            let inputs: Vec<Resource> = ctx.params.resources().into_iter().cloned().collect();
            if inputs.iter().any(|r| r.to_string() == "boom") {
                return RuleOutput::failed("compilation failed");
            }
            RuleOutput::success(inputs).with_messages(vec![Message::info("compiled")])
        });
        let delay: Arc<dyn Processor> = Arc::new(|ctx: &ExecutionContext| {
            let ms: u64 = ctx.params.string("ms").and_then(|s| s.parse().ok()).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            RuleOutput::success(ctx.params.single("ms").cloned().into_iter().collect())
        });
        let stamp_calls = Arc::new(AtomicUsize::new(0));
        let stamps = stamp_calls.clone();
        let stamp: Arc<dyn Processor> = Arc::new(move |ctx: &ExecutionContext| {
            stamps.fetch_add(1, Ordering::SeqCst);
            let name = ctx.params.string("name").unwrap_or("stamp");
            let path = ctx.target_path.join(name);
            let written = std::fs::create_dir_all(&ctx.target_path)
                .and_then(|_| std::fs::write(&path, "stamped"));
            match written {
                Ok(()) => RuleOutput::success(vec![Resource::file(&path, &ctx.target_path)]),
                Err(e) => RuleOutput::failed(e.to_string()),
            }
        });
        let processor = RuleProcessor::new()
            .with_extension("compile", compile)
            .with_extension("delay", delay)
            .with_extension("stamp", stamp);
        Harness {
            compile_calls,
            stamp_calls,
            processor: Arc::new(processor),
        }
    }

    fn registry() -> RuleRegistry {
        let mut registry = test_registry();
        registry
            .register(RuleSpec::extension(
                "delay",
                vec![ParamSchema::single("ms", ResourceKind::String)],
            ))
            .unwrap();
        registry
            .register(RuleSpec::extension(
                "stamp",
                vec![ParamSchema::single("name", ResourceKind::String)],
            ))
            .unwrap();
        registry
    }

    const PREAMBLE: &str = "compile(srcs: [], cp: [])\nanon delay(ms)\nstamp(name)\n";

    fn program(base: &Path, source: &str) -> Arc<Program> {
        let loader = ChainLoader::new().with(SystemModuleLoader).with(
            MemoryModuleLoader::new(base).with_module("", &format!("{}{}", PREAMBLE, source)),
        );
        Arc::new(resolve("", &loader, &registry()).unwrap())
    }

    fn options(base: &Path, host: &str) -> EngineOptions {
        EngineOptions {
            jobs: 4,
            out_dir: base.join("kiln-out"),
            fingerprint: FingerprintMode::SizeMtime,
            host: HostEnv::new(host),
        }
    }

    fn build(
        program: &Arc<Program>,
        harness: &Harness,
        store: Arc<dyn RecordStore>,
        base: &Path,
        goal: &str,
    ) -> BuildReport {
        let opts = options(base, "linux");
        let graph = build_graph(program, &opts.host, goal).unwrap();
        Engine::new(program.clone(), harness.processor.clone(), store, opts)
            .run(&graph)
            .unwrap()
    }

    fn result_of<'a>(program: &Program, report: &'a BuildReport, goal: &str) -> &'a RuleResult {
        &report.results[&program.find_goal(goal).unwrap()]
    }

    #[test]
    fn test_composed_rule_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "leaf = 'x'\nmid(p) = p\ntop = mid(p = leaf)");
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        assert!(report.success());
        assert_eq!(
            report.target_result().unwrap(),
            &RuleResult::Success(vec![Resource::string("x", "")])
        );
    }

    #[test]
    fn test_cached_invocation_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "leaf = 'x'\nout = compile(srcs = [leaf], cp = [])");
        let h = harness();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());

        let first = build(&program, &h, store.clone(), dir.path(), "out");
        let second = build(&program, &h, store, dir.path(), "out");
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.target_result(), second.target_result());
        assert_eq!(
            second.target_result().unwrap().resources(),
            &[Resource::string("x", "")]
        );
        assert_eq!((first.rules_executed, first.rules_cached), (1, 0));
        assert_eq!((second.rules_executed, second.rules_cached), (0, 1));
        let provenance = second.target_result().unwrap().resources()[0].provenance().unwrap().clone();
        assert_eq!(provenance.rule, "compile");
        assert_eq!(provenance.goal, "out");
    }

    #[test]
    fn test_cache_misses_after_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "one").unwrap();
        let program = program(dir.path(), "src = files(['a.txt'])\nout = compile(srcs = [src])");
        let h = harness();
        let store: Arc<dyn RecordStore> = Arc::new(FsRecordStore);

        build(&program, &h, store.clone(), dir.path(), "out");
        build(&program, &h, store.clone(), dir.path(), "out");
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 1);

        std::fs::write(&src, "longer contents").unwrap();
        let report = build(&program, &h, store, dir.path(), "out");
        assert!(report.success());
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("kiln-out/out").is_dir());
    }

    #[test]
    fn test_glob_sees_files_added_between_builds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let program = program(dir.path(), "srcs = glob(['*.txt'])");
        let h = harness();
        let store: Arc<dyn RecordStore> = Arc::new(FsRecordStore);

        let first = build(&program, &h, store.clone(), dir.path(), "srcs");
        assert_eq!(first.target_result().unwrap().resources().len(), 1);

        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        let second = build(&program, &h, store, dir.path(), "srcs");
        let names: Vec<String> = second
            .target_result()
            .unwrap()
            .resources()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                dir.path().join("a.txt").display().to_string(),
                dir.path().join("b.txt").display().to_string(),
            ]
        );
        assert_eq!((second.rules_executed, second.rules_cached), (1, 0));
    }

    #[test]
    fn test_write_file_restores_deleted_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "out = write_file(name = 'v.txt', lines = ['x'])");
        let h = harness();
        let store = Arc::new(MemoryRecordStore::new());
        let written = dir.path().join("kiln-out/out/v.txt");

        build(&program, &h, store.clone(), dir.path(), "out");
        assert!(written.is_file());
        assert!(store.is_empty());

        std::fs::remove_file(&written).unwrap();
        let report = build(&program, &h, store.clone(), dir.path(), "out");
        assert!(report.success());
        assert_eq!((report.rules_executed, report.rules_cached), (1, 0));
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "x\n");
    }

    #[test]
    fn test_cached_call_reruns_when_output_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "out = stamp(name = 'done')");
        let h = harness();
        let store: Arc<dyn RecordStore> = Arc::new(FsRecordStore);
        let stamped = dir.path().join("kiln-out/out/done");

        build(&program, &h, store.clone(), dir.path(), "out");
        let cached = build(&program, &h, store.clone(), dir.path(), "out");
        assert_eq!(h.stamp_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.rules_cached, 1);

        std::fs::remove_file(&stamped).unwrap();
        let report = build(&program, &h, store, dir.path(), "out");
        assert!(report.success());
        assert_eq!(h.stamp_calls.load(Ordering::SeqCst), 2);
        assert_eq!((report.rules_executed, report.rules_cached), (1, 0));
        assert!(stamped.is_file());
    }

    #[test]
    fn test_failed_call_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "out = compile(srcs = ['boom'])");
        let h = harness();
        let store = Arc::new(MemoryRecordStore::new());
        build(&program, &h, store.clone(), dir.path(), "out");
        build(&program, &h, store.clone(), dir.path(), "out");
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_shared_goal_executes_once() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(
            dir.path(),
            "c = compile(srcs = ['c'])\na = [c, 'a']\nb = [c, 'b']\ntop = [a, b]",
        );
        let h = harness();
        let report = build(&program, &h, Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.results.len(), 4);
        let values: Vec<String> = report
            .target_result()
            .unwrap()
            .resources()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(values, vec!["c", "a", "c", "b"]);
    }

    #[test]
    fn test_failure_propagates_to_dependents_only() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(
            dir.path(),
            "bad = compile(srcs = ['boom'])\nmid = [bad]\nindirect = [mid]\nfine = 'ok'\ntop = [indirect, fine]",
        );
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
        for failed in ["bad", "mid", "indirect", "top"] {
            assert!(!result_of(&program, &report, failed).is_success(), "{}", failed);
        }
        assert_eq!(
            result_of(&program, &report, "fine"),
            &RuleResult::Success(vec![Resource::string("ok", "")])
        );
        match result_of(&program, &report, "top") {
            RuleResult::Failed(f) => assert_eq!(f.message, "compilation failed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_list_order_independent_of_completion() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "top = [delay('150'), delay('1'), delay('60')]");
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        let values: Vec<String> = report
            .target_result()
            .unwrap()
            .resources()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(values, vec!["150", "1", "60"]);
    }

    #[test]
    fn test_failure_trace_through_composed_rule() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "wrap(x) = compile(srcs = [x])\ntop = wrap(x = 'boom')");
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        match report.target_result().unwrap() {
            RuleResult::Failed(f) => {
                let rules: Vec<&str> = f.trace.iter().map(|e| e.rule.as_str()).collect();
                assert_eq!(rules, vec!["compile", "wrap"]);
                assert_eq!(f.trace[1].at.pos.line, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_argument_fails_only_its_goal() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(
            dir.path(),
            "r(a) = [a]\nbroken = r()\nnative = write_file(lines = ['x'])\nok = 'x'\ntop = [broken, native, ok]",
        );
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        match result_of(&program, &report, "broken") {
            RuleResult::Failed(f) => {
                assert_eq!(f.message, "'r' requires a value for parameter 'a'");
                assert_eq!(f.trace[0].rule, "r");
            }
            other => panic!("unexpected {:?}", other),
        }
        match result_of(&program, &report, "native") {
            RuleResult::Failed(f) => {
                assert_eq!(f.message, "'write_file' requires a value for parameter 'name'")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            result_of(&program, &report, "ok"),
            &RuleResult::Success(vec![Resource::string("x", "")])
        );
        assert!(!report.target_result().unwrap().is_success());
    }

    #[test]
    fn test_binding_error_fails_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let program = program(dir.path(), "out = write_file(name = files(['a.txt']))");
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "out");
        match report.target_result().unwrap() {
            RuleResult::Failed(f) => {
                assert!(f.message.contains("expects a string resource"), "{}", f.message);
                assert_eq!(f.trace[0].rule, "write_file");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pruned_arguments_are_not_built() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(
            dir.path(),
            "bad = compile(srcs = ['boom'])\ntop = [on_windows([bad]), on_linux(['l'])]",
        );
        let h = harness();
        let report = build(&program, &h, Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        assert!(report.success());
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.target_result().unwrap().resources(),
            &[Resource::string("l", "")]
        );
    }

    #[test]
    fn test_string_converts_to_file_in_call_site_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/data.bin"), "d").unwrap();
        let loader = ChainLoader::new().with(SystemModuleLoader).with(
            MemoryModuleLoader::new(dir.path())
                .with_module("", "import lib\ntop = lib.data")
                .with_module("lib", "export data\ndata = prebuilt_file('data.bin')"),
        );
        let program = Arc::new(resolve("", &loader, &registry()).unwrap());
        let report = build(&program, &harness(), Arc::new(MemoryRecordStore::new()), dir.path(), "top");
        assert_eq!(
            report.target_result().unwrap().resources(),
            &[Resource::file(dir.path().join("lib/data.bin"), dir.path().join("lib"))]
        );
    }

    #[test]
    fn test_release_resources_after_run() {
        struct Releasing(AtomicUsize);
        impl Processor for Releasing {
            fn process(&self, ctx: &ExecutionContext) -> RuleOutput {
                RuleProcessor::new().process(ctx)
            }
            fn release_resources(&self, resources: &[Resource]) {
                self.0.fetch_add(resources.len(), Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "a = 'a'\nb = ['b', 'c']\ntop = [a, b]");
        let releasing = Arc::new(Releasing(AtomicUsize::new(0)));
        let opts = options(dir.path(), "linux");
        let graph = build_graph(&program, &opts.host, "top").unwrap();
        Engine::new(program.clone(), releasing.clone(), Arc::new(MemoryRecordStore::new()), opts)
            .run(&graph)
            .unwrap();
        assert_eq!(releasing.0.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_execute_on_existing_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "a = compile(srcs = ['a'])\nb = compile(srcs = ['b'])\ntop = [a, b]");
        let h = harness();
        let opts = options(dir.path(), "linux");
        let graph = build_graph(&program, &opts.host, "top").unwrap();
        let engine = Engine::new(
            program.clone(),
            h.processor.clone(),
            Arc::new(MemoryRecordStore::new()),
            opts,
        );
        let report = engine.execute(&graph).await;
        assert!(report.success());
        assert_eq!(report.rules_executed, 2);
        assert_eq!(h.compile_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_log_records_run() {
        let dir = tempfile::tempdir().unwrap();
        let program = program(dir.path(), "leaf = 'x'\nout = compile(srcs = [leaf])");
        let h = harness();
        let events = Arc::new(EventLog::open(&dir.path().join(".kiln"), "r-test").unwrap());
        let opts = options(dir.path(), "linux");
        let graph = build_graph(&program, &opts.host, "out").unwrap();
        Engine::new(program.clone(), h.processor.clone(), Arc::new(MemoryRecordStore::new()), opts)
            .with_event_log(events.clone())
            .run(&graph)
            .unwrap();

        let content = std::fs::read_to_string(events.path()).unwrap();
        for kind in [
            "build_started",
            "goal_started",
            "goal_completed",
            "rule_executed",
            "build_completed",
        ] {
            assert!(content.contains(kind), "missing {}", kind);
        }
    }
}
