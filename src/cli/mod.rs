//! CLI subcommands: init, build, goals, graph, validate, status, clean.

use crate::core::config::{self, Settings, CONFIG_FILE};
use crate::core::executor::{BuildReport, Engine, EngineOptions};
use crate::core::fingerprint::FingerprintMode;
use crate::core::graph::build_graph;
use crate::core::resolver::resolve;
use crate::core::state::{self, FsRecordStore};
use crate::core::tree::Program;
use crate::core::types::RuleResult;
use crate::lang::loader::{project_loader, BUILD_FILE};
use crate::provenance::eventlog::{self, EventLog};
use crate::rules::{HostEnv, RuleProcessor, RuleRegistry};
use clap::Subcommand;
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new kiln project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Build a goal and everything it depends on
    Build {
        /// Goal name (`name` for root goals, `module.name` for exported ones)
        goal: String,

        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,

        /// Worker threads (overrides kiln.yaml)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Change detection for rule inputs (overrides kiln.yaml)
        #[arg(long, value_enum)]
        fingerprint: Option<FingerprintMode>,
    },

    /// List the goals that can be built
    Goals {
        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Show the dependency graph of a goal in scheduling order
    Graph {
        goal: String,

        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Check kiln.yaml and resolve every module without building
    Validate {
        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Show cached invocation records and recent build events
    Status {
        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,

        /// Number of recent events to show
        #[arg(long, default_value_t = 10)]
        events: usize,
    },

    /// Remove the output and cache directories
    Clean {
        /// Project directory containing BUILD.kiln
        #[arg(short = 'C', long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command. `Completions` needs the top-level parser and is
/// handled by the binary.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Build {
            goal,
            project_dir,
            jobs,
            fingerprint,
        } => cmd_build(&project_dir, &goal, jobs, fingerprint),
        Commands::Goals { project_dir } => cmd_goals(&project_dir),
        Commands::Graph { goal, project_dir } => cmd_graph(&project_dir, &goal),
        Commands::Validate { project_dir } => cmd_validate(&project_dir),
        Commands::Status {
            project_dir,
            events,
        } => cmd_status(&project_dir, events),
        Commands::Clean { project_dir } => cmd_clean(&project_dir),
        Commands::Completions { .. } => Err("completions are generated by the kiln binary".to_string()),
    }
}

/// Settings from `kiln.yaml`, rejected when invalid.
fn load_valid_settings(project_dir: &Path) -> Result<Settings, String> {
    let settings = config::load_settings(project_dir)?;
    let errors = config::validate_settings(&settings);
    if errors.is_empty() {
        return Ok(settings);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{}: {} validation error(s)", CONFIG_FILE, errors.len()))
}

/// Parse and resolve the project rooted at `project_dir`.
pub fn load_program(project_dir: &Path) -> Result<Program, String> {
    let loader = project_loader(project_dir);
    resolve("", &loader, &RuleRegistry::builtin()).map_err(|e| e.to_string())
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let build_path = path.join(BUILD_FILE);
    if build_path.exists() {
        return Err(format!("{} already exists", build_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let build = r#"# Goals are built with `kiln build <goal>`.
sources = glob(['src/**/*'])
manifest = write_file(name = 'manifest.txt', lines = ['kiln project'])
all = [sources, manifest]
"#;
    let settings = "# out_dir: kiln-out\n# cache_dir: .kiln\n# fingerprint: size_mtime\n# jobs: 8\nevent_log: true\n";

    std::fs::write(&build_path, build)
        .map_err(|e| format!("cannot write {}: {}", build_path.display(), e))?;
    let config_path = path.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, settings)
            .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;
    }

    println!("Initialized kiln project at {}", path.display());
    println!("  Created: {}", build_path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_build(
    project_dir: &Path,
    goal: &str,
    jobs: Option<usize>,
    fingerprint: Option<FingerprintMode>,
) -> Result<(), String> {
    let mut settings = load_valid_settings(project_dir)?;
    if let Some(jobs) = jobs {
        if jobs == 0 {
            return Err("--jobs must be at least 1".to_string());
        }
        settings.jobs = Some(jobs);
    }
    if let Some(mode) = fingerprint {
        settings.fingerprint = mode;
    }

    let program = Arc::new(load_program(project_dir)?);
    let options = EngineOptions::from_settings(&settings, project_dir);
    let graph = build_graph(&program, &options.host, goal).map_err(|e| e.to_string())?;

    let mut engine = Engine::new(
        program.clone(),
        Arc::new(RuleProcessor::new()),
        Arc::new(FsRecordStore),
        options,
    );
    if settings.event_log {
        let log = EventLog::open(
            &settings.cache_dir(project_dir),
            &eventlog::generate_run_id(),
        )?;
        engine = engine.with_event_log(Arc::new(log));
    }

    println!(
        "Building {} ({} goals, {} jobs)",
        goal,
        graph.len(),
        settings.jobs()
    );
    let report = engine.run(&graph).map_err(|e| e.to_string())?;
    print_report(&program, &report);

    let failed = report.failures().len();
    if failed > 0 {
        return Err(format!("{} goal(s) failed", failed));
    }
    Ok(())
}

fn print_report(program: &Program, report: &BuildReport) {
    for (id, result) in &report.results {
        let name = program.goal(*id).qualified_name();
        match result {
            RuleResult::Success(resources) => {
                println!("  ok    {} ({} resources)", name, resources.len())
            }
            RuleResult::Failed(_) => println!("  FAIL  {}", name),
        }
    }

    let failures = report.failures();
    if !failures.is_empty() {
        eprintln!();
        for (id, failure) in &failures {
            eprintln!("goal '{}' failed: {}", program.goal(*id).qualified_name(), failure);
        }
    }

    if let Some(RuleResult::Success(resources)) = report.target_result() {
        for resource in resources {
            println!("    {}", resource);
        }
    }

    println!();
    println!(
        "Build {}: {} goals, {} rules executed, {} cached ({:.2}s)",
        if failures.is_empty() { "complete" } else { "FAILED" },
        report.results.len(),
        report.rules_executed,
        report.rules_cached,
        report.duration.as_secs_f64()
    );
}

fn cmd_goals(project_dir: &Path) -> Result<(), String> {
    let program = load_program(project_dir)?;
    let mut names: Vec<String> = program
        .exposed_goals()
        .into_iter()
        .map(|id| program.goal(id).qualified_name())
        .collect();
    for (name, module) in &program.modules {
        if *name == program.root {
            continue;
        }
        if let Some(table) = program.symbols.module(&module.name) {
            names.extend(
                table
                    .goals()
                    .filter(|id| table.is_exported(&program.goal(*id).name))
                    .map(|id| program.goal(id).qualified_name()),
            );
        }
    }
    if names.is_empty() {
        println!("No goals defined.");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_graph(project_dir: &Path, goal: &str) -> Result<(), String> {
    let program = load_program(project_dir)?;
    let graph = build_graph(&program, &HostEnv::default(), goal).map_err(|e| e.to_string())?;
    for (i, wave) in graph.waves(&program).iter().enumerate() {
        println!("Wave {}:", i + 1);
        for id in wave {
            let deps: Vec<String> = graph
                .node(*id)
                .map(|n| n.deps.iter().map(|d| program.goal(*d).qualified_name()).collect())
                .unwrap_or_default();
            if deps.is_empty() {
                println!("  {}", program.goal(*id).qualified_name());
            } else {
                println!("  {} <- {}", program.goal(*id).qualified_name(), deps.join(", "));
            }
        }
    }
    Ok(())
}

fn cmd_validate(project_dir: &Path) -> Result<(), String> {
    load_valid_settings(project_dir)?;
    let program = load_program(project_dir)?;
    println!(
        "OK: {} ({} modules, {} goals, {} rules)",
        project_dir.join(BUILD_FILE).display(),
        program.modules.len(),
        program.goals.len(),
        program.rules.len()
    );
    Ok(())
}

fn cmd_status(project_dir: &Path, recent: usize) -> Result<(), String> {
    let settings = config::load_settings(project_dir)?;
    let out_dir = settings.out_dir(project_dir);
    let records = state::list_records(&out_dir)?;

    if records.is_empty() {
        println!("No invocation records. Run `kiln build <goal>` first.");
    } else {
        println!("Invocation records ({}):", records.len());
        for (path, record) in &records {
            let shown = path.strip_prefix(&out_dir).unwrap_or(path);
            println!(
                "  {}: {} [{} resources, {}]",
                record.goal,
                record.rule,
                record.result.len(),
                record.generated_at
            );
            println!("    {}", shown.display());
        }
    }

    let events = eventlog::read_events(&eventlog::event_log_path(&settings.cache_dir(project_dir)))?;
    if !events.is_empty() {
        println!();
        println!("Recent events:");
        let skip = events.len().saturating_sub(recent);
        for event in &events[skip..] {
            let json = serde_json::to_string(&event.event).unwrap_or_default();
            println!("  {} {}", event.ts, json);
        }
    }
    Ok(())
}

fn cmd_clean(project_dir: &Path) -> Result<(), String> {
    let settings = config::load_settings(project_dir)?;
    let mut removed = 0;
    for dir in [settings.out_dir(project_dir), settings.cache_dir(project_dir)] {
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| format!("cannot remove {}: {}", dir.display(), e))?;
            println!("Removed {}", dir.display());
            removed += 1;
        }
    }
    if removed == 0 {
        println!("Nothing to clean.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(build: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BUILD_FILE), build).unwrap();
        dir
    }

    const NOTES: &str = "notes = write_file(name = 'notes.txt', lines = ['a', 'b'])\nall = [notes, 'done']\n";

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("new-project");
        cmd_init(&sub).unwrap();
        assert!(sub.join(BUILD_FILE).exists());
        assert!(sub.join(CONFIG_FILE).exists());
        cmd_validate(&sub).unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = project("x = 'y'");
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_build_writes_outputs() {
        let dir = project(NOTES);
        dispatch(Commands::Build {
            goal: "all".to_string(),
            project_dir: dir.path().to_path_buf(),
            jobs: Some(2),
            fingerprint: None,
        })
        .unwrap();
        let written = std::fs::read_to_string(dir.path().join("kiln-out/notes/notes.txt")).unwrap();
        assert_eq!(written, "a\nb\n");
        assert!(dir.path().join(".kiln/events.jsonl").exists());

        let records = state::list_records(&dir.path().join("kiln-out")).unwrap();
        assert!(records.is_empty());
        cmd_status(dir.path(), 5).unwrap();

        std::fs::remove_file(dir.path().join("kiln-out/notes/notes.txt")).unwrap();
        cmd_build(dir.path(), "all", None, None).unwrap();
        assert!(dir.path().join("kiln-out/notes/notes.txt").is_file());
    }

    #[test]
    fn test_build_failure_is_error() {
        let dir = project("missing = prebuilt_file('nope.bin')\nfine = 'ok'\ntop = [missing, fine]");
        let err = cmd_build(dir.path(), "top", None, None).unwrap_err();
        assert_eq!(err, "2 goal(s) failed");
    }

    #[test]
    fn test_build_unknown_goal() {
        let dir = project(NOTES);
        let err = cmd_build(dir.path(), "nope", None, None).unwrap_err();
        assert!(err.contains("unknown goal 'nope'"));
    }

    #[test]
    fn test_build_rejects_zero_jobs() {
        let dir = project(NOTES);
        assert!(cmd_build(dir.path(), "all", Some(0), None).is_err());
    }

    #[test]
    fn test_build_without_event_log() {
        let dir = project(NOTES);
        std::fs::write(dir.path().join(CONFIG_FILE), "event_log: false\nfingerprint: content\n").unwrap();
        cmd_build(dir.path(), "all", None, None).unwrap();
        assert!(!dir.path().join(".kiln").exists());
    }

    #[test]
    fn test_invalid_settings_block_build() {
        let dir = project(NOTES);
        std::fs::write(dir.path().join(CONFIG_FILE), "out_dir: same\ncache_dir: same\n").unwrap();
        let err = cmd_build(dir.path(), "all", None, None).unwrap_err();
        assert!(err.contains("validation error"));
        assert!(cmd_validate(dir.path()).is_err());
    }

    #[test]
    fn test_goals_and_graph() {
        let dir = project("import lib\nexport top\ntop = [lib.shared, 'x']");
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join(BUILD_FILE), "export shared\nshared = 'lib'\nhidden = 'h'").unwrap();
        cmd_goals(dir.path()).unwrap();
        cmd_graph(dir.path(), "top").unwrap();
        cmd_graph(dir.path(), "lib.shared").unwrap();
        assert!(cmd_graph(dir.path(), "lib.hidden").is_err());
    }

    #[test]
    fn test_validate_reports_resolve_errors() {
        let dir = project("top = undefined_rule('x')");
        let err = cmd_validate(dir.path()).unwrap_err();
        assert!(err.contains("unknown rule 'undefined_rule'"));
    }

    #[test]
    fn test_status_without_records() {
        let dir = project(NOTES);
        cmd_status(dir.path(), 10).unwrap();
    }

    #[test]
    fn test_clean() {
        let dir = project(NOTES);
        cmd_build(dir.path(), "all", None, None).unwrap();
        assert!(dir.path().join("kiln-out").is_dir());
        dispatch(Commands::Clean {
            project_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        assert!(!dir.path().join("kiln-out").exists());
        assert!(!dir.path().join(".kiln").exists());
        cmd_clean(dir.path()).unwrap();
    }
}
