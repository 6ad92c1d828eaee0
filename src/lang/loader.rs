//! Module loaders: find a module by name and parse it.
//!
//! The root module is named `""` and lives in `<project>/BUILD.kiln`; module
//! `a.b` lives in `<project>/a/b/BUILD.kiln`. The `kiln` module is built in.

use super::ast::BuildFile;
use super::parser::parse_build_file;
use crate::core::error::ResolveError;
use crate::rules::{PRELUDE, PRELUDE_MODULE};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub const BUILD_FILE: &str = "BUILD.kiln";

/// A parsed module and the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub name: String,
    pub dir: PathBuf,
    pub file: BuildFile,
}

pub trait ModuleLoader {
    /// `Ok(None)` when this loader does not know the module.
    fn load(&self, name: &str) -> Result<Option<LoadedModule>, ResolveError>;
}

/// Directory of module `name` below `base`.
pub fn module_dir(base: &Path, name: &str) -> PathBuf {
    if name.is_empty() {
        base.to_path_buf()
    } else {
        base.join(name.replace('.', "/"))
    }
}

/// Loads `BUILD.kiln` files from a project directory.
#[derive(Debug, Clone)]
pub struct PathModuleLoader {
    project_dir: PathBuf,
}

impl PathModuleLoader {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }
}

impl ModuleLoader for PathModuleLoader {
    fn load(&self, name: &str) -> Result<Option<LoadedModule>, ResolveError> {
        let dir = module_dir(&self.project_dir, name);
        let path = dir.join(BUILD_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let source = std::fs::read_to_string(&path).map_err(|e| ResolveError::ModuleLoad {
            module: name.to_string(),
            error: format!("cannot read {}: {}", path.display(), e),
        })?;
        let file = parse_build_file(name, &source)?;
        Ok(Some(LoadedModule {
            name: name.to_string(),
            dir,
            file,
        }))
    }
}

/// Serves the built-in `kiln` module.
#[derive(Debug, Clone, Default)]
pub struct SystemModuleLoader;

impl ModuleLoader for SystemModuleLoader {
    fn load(&self, name: &str) -> Result<Option<LoadedModule>, ResolveError> {
        if name != PRELUDE_MODULE {
            return Ok(None);
        }
        Ok(Some(LoadedModule {
            name: name.to_string(),
            dir: PathBuf::new(),
            file: parse_build_file(name, PRELUDE)?,
        }))
    }
}

/// In-memory sources keyed by module name, rooted at a virtual directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryModuleLoader {
    base: PathBuf,
    sources: IndexMap<String, String>,
}

impl MemoryModuleLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            sources: IndexMap::new(),
        }
    }

    pub fn with_module(mut self, name: &str, source: &str) -> Self {
        self.sources.insert(name.to_string(), source.to_string());
        self
    }
}

impl ModuleLoader for MemoryModuleLoader {
    fn load(&self, name: &str) -> Result<Option<LoadedModule>, ResolveError> {
        let source = match self.sources.get(name) {
            Some(source) => source,
            None => return Ok(None),
        };
        Ok(Some(LoadedModule {
            name: name.to_string(),
            dir: module_dir(&self.base, name),
            file: parse_build_file(name, source)?,
        }))
    }
}

/// Tries each loader in turn; the first that knows the module wins.
#[derive(Default)]
pub struct ChainLoader {
    loaders: Vec<Box<dyn ModuleLoader>>,
}

impl ChainLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }
}

impl ModuleLoader for ChainLoader {
    fn load(&self, name: &str) -> Result<Option<LoadedModule>, ResolveError> {
        for loader in &self.loaders {
            if let Some(module) = loader.load(name)? {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }
}

/// Built-in prelude first, then the project's build files.
pub fn project_loader(project_dir: &Path) -> ChainLoader {
    ChainLoader::new()
        .with(SystemModuleLoader)
        .with(PathModuleLoader::new(project_dir))
}
