//! CLI command implementations.

pub mod config;
pub mod name;
pub mod run;
pub mod version;
