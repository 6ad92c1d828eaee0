//! Build language front end: parse tree, parser and module loaders.

pub mod ast;
pub mod loader;
pub mod parser;
