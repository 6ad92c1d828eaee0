//! `exec(src, work_dir?, arguments: [])`: run a program and report its output.

use super::{ExecutionContext, RuleOutput};
use crate::core::types::Message;
use std::process::{Command, Stdio};

/// Output from running a program.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub fn execute(ctx: &ExecutionContext) -> RuleOutput {
    let program = match ctx.params.file("src") {
        Some(file) => file.path.clone(),
        None => return RuleOutput::failed("exec requires a program"),
    };
    let work_dir = ctx
        .params
        .file("work_dir")
        .map(|f| f.path.clone())
        .unwrap_or_else(|| ctx.module_dir.clone());
    let args: Vec<String> = ctx
        .params
        .list("arguments")
        .iter()
        .map(|r| r.to_string())
        .collect();

    let mut command = Command::new(&program);
    command
        .args(&args)
        .current_dir(&work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let output = match command.output() {
        Ok(output) => ExecOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => return RuleOutput::failed(format!("failed to spawn {}: {}", program.display(), e)),
    };

    let mut messages: Vec<Message> = output.stdout.lines().map(Message::info).collect();
    messages.extend(output.stderr.lines().map(Message::warning));
    let result = if output.success() {
        Ok(Vec::new())
    } else {
        Err(format!(
            "{} exited with code {}",
            program.display(),
            output.exit_code
        ))
    };
    RuleOutput { result, messages }
}
