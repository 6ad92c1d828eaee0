//! File rules: `files(srcs: [])`, `prebuilt_file(file)`, `write_file(name, lines: [])`.

use super::{ExecutionContext, RuleOutput};
use crate::core::types::{FileResource, Resource};

/// Pass existing files through; a missing source fails the call.
pub fn execute_files(ctx: &ExecutionContext) -> RuleOutput {
    let mut resources = Vec::new();
    for file in ctx.params.files("srcs") {
        if !file.path.exists() {
            return RuleOutput::failed(format!("source file {} does not exist", file.path.display()));
        }
        resources.push(Resource::File(file.clone()));
    }
    RuleOutput::success(resources)
}

pub fn execute_prebuilt(ctx: &ExecutionContext) -> RuleOutput {
    match ctx.params.file("file") {
        Some(file) if file.path.is_file() => RuleOutput::success(vec![Resource::File(file.clone())]),
        Some(file) => RuleOutput::failed(format!("prebuilt file {} does not exist", file.path.display())),
        None => RuleOutput::failed("prebuilt_file requires a file"),
    }
}

/// Write `lines` to `<target>/<name>` and return the written file.
pub fn execute_write(ctx: &ExecutionContext) -> RuleOutput {
    let name = match ctx.params.string("name") {
        Some(name) => name,
        None => return RuleOutput::failed("write_file requires a name"),
    };
    let mut content = String::new();
    for line in ctx.params.list("lines") {
        content.push_str(&line.to_string());
        content.push('\n');
    }
    write_file(ctx, name, &content).into()
}

fn write_file(ctx: &ExecutionContext, name: &str, content: &str) -> Result<Vec<Resource>, String> {
    let path = ctx.target_path.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    std::fs::write(&path, content).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    Ok(vec![Resource::File(FileResource::new(path, &ctx.target_path))])
}
