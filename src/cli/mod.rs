//! Command line interface module
//!
//! Argument parsing and the runner that wires the components of a mirror run together.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::{Runner, run_with};
