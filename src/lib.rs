//! Kiln: a declarative build orchestrator.
//!
//! Build files declare goals and rules in a small language. The resolver
//! turns them into one symbol-resolved program, the graph builder orders the
//! goals a target needs, and the execution engine runs them in parallel,
//! skipping native rule calls whose inputs have not changed since the last
//! run.

pub mod cli;
pub mod core;
pub mod lang;
pub mod provenance;
pub mod rules;
