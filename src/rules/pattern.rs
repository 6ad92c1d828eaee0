//! `glob(pattern: [])`: files matching patterns relative to the calling module.

use super::{ExecutionContext, RuleOutput};
use crate::core::types::{Resource, ResourceKind};
use std::path::Path;

pub fn execute(ctx: &ExecutionContext) -> RuleOutput {
    let mut resources = Vec::new();
    for pattern in ctx.params.list("pattern") {
        let text = match pattern {
            Resource::String(s) => &s.value,
            other => {
                return RuleOutput::failed(format!(
                    "glob pattern must be a {}, got {}",
                    ResourceKind::String,
                    other.kind()
                ))
            }
        };
        match expand(&ctx.module_dir, text) {
            Ok(files) => resources.extend(files),
            Err(e) => return RuleOutput::failed(e),
        }
    }
    RuleOutput::success(resources)
}

/// Expand one pattern; matches are sorted and limited to regular files.
fn expand(base: &Path, pattern: &str) -> Result<Vec<Resource>, String> {
    let full = base.join(pattern);
    let full = full.to_string_lossy();
    let paths = ::glob::glob(&full).map_err(|e| format!("invalid glob '{}': {}", pattern, e))?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| format!("cannot read {}: {}", e.path().display(), e))?;
        if path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches
        .into_iter()
        .map(|path| Resource::file(path, base))
        .collect())
}
