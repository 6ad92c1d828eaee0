//! Provenance: content hashing and the build event log.

pub mod eventlog;
pub mod hasher;
