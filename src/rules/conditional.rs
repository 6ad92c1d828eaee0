//! Platform conditional rules: `on_linux`, `on_windows`, `on_macos`.
//!
//! On the matching platform the passthrough resources come back unchanged;
//! elsewhere the call yields nothing, and its arguments are never built.

use super::{ExecutionContext, NativeRule, RuleOutput};

pub fn execute(rule: NativeRule, ctx: &ExecutionContext) -> RuleOutput {
    match rule.platform() {
        Some(os) if os == ctx.host.os => {
            RuleOutput::success(ctx.params.list("passthrough").to_vec())
        }
        _ => RuleOutput::success(Vec::new()),
    }
}
