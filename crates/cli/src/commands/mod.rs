//! Subcommand implementations

pub mod policy;
pub mod poll;
pub mod sessions;
