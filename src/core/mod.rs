//! Core build logic: resolution, graph construction, caching, execution.

pub mod binding;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod resolver;
pub mod state;
pub mod symbols;
pub mod tree;
pub mod types;
