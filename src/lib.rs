//! ECR Mirror Library
//!
//! Mirrors container image repositories from Docker Hub, Quay and GCR into a private or public
//! Amazon ECR registry. The binary in `main.rs` only parses arguments and hands off to
//! [`cli::Runner`].

pub mod cli;
pub mod common;
pub mod concurrency;
pub mod config;
pub mod ecr;
pub mod error;
pub mod filter;
pub mod logging;
pub mod mirror;
pub mod runtime;
pub mod source;

pub use config::{Config, RepositorySpec, Settings};
pub use error::{MirrorError, Result};
