//! Command line interface module
//!
//! Argument parsing and validation, the mapping file format of the `resolve`
//! command, and the runner that executes each subcommand.

pub mod args;
pub mod config;
pub mod runner;

pub use args::{Args, Command};
pub use config::{MappingFile, ResolutionOutput};
pub use runner::Runner;
