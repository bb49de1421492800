//! Command-line argument parsing
//!
//! Every option can also be given through its environment variable.

use crate::config::SourceCredentials;
use crate::error::{MirrorError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Clone)]
#[command(name = "ecr-mirror")]
#[command(about = "Mirror container image repositories into Amazon ECR")]
#[command(version)]
pub struct Args {
    /// Path to the YAML configuration
    #[arg(
        long = "config-file",
        short = 'c',
        env = "CONFIG_FILE",
        default_value = "config.yaml",
        help = "Path to the YAML configuration file"
    )]
    pub config_file: PathBuf,

    #[arg(
        long = "log-level",
        env = "LOG_LEVEL",
        default_value = "info",
        help = "Log level: trace, debug, info, warn, error"
    )]
    pub log_level: String,

    /// Only run repositories whose name starts with this
    #[arg(
        long = "prefix",
        env = "PREFIX",
        help = "Only mirror repositories whose name starts with this prefix"
    )]
    pub prefix: Option<String>,

    /// Kept as text so a bad value is reported as a configuration error
    #[arg(
        long = "workers",
        short = 'j',
        env = "NUM_WORKERS",
        help = "Number of concurrent sync workers, overrides the config file"
    )]
    pub num_workers: Option<String>,

    #[arg(
        long = "inactivity-timeout",
        env = "INACTIVITY_TIMEOUT",
        default_value = "1",
        help = "Minutes a docker pull/push may go without printing an output line before it is killed; \
                docker prints no per-chunk progress without a TTY, so a single slow layer counts as silence"
    )]
    pub inactivity_timeout: String,

    #[arg(
        long = "dockerhub-user",
        env = "DOCKERHUB_USER",
        help = "Docker Hub username for tag listing and pulls"
    )]
    pub dockerhub_user: Option<String>,

    #[arg(
        long = "dockerhub-password",
        env = "DOCKERHUB_PASSWORD",
        hide_env_values = true,
        help = "Docker Hub password for tag listing and pulls"
    )]
    pub dockerhub_password: Option<String>,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Worker override, `None` when unset or empty
    pub fn workers(&self) -> Result<Option<usize>> {
        match self.num_workers.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse::<usize>()
                .map(Some)
                .map_err(|_| MirrorError::Config(format!("Invalid NUM_WORKERS: {}", value))),
        }
    }

    pub fn inactivity_timeout(&self) -> Result<Duration> {
        let minutes = self.inactivity_timeout.trim();
        match minutes.parse::<u64>() {
            Ok(m) if m > 0 => Ok(Duration::from_secs(m * 60)),
            _ => Err(MirrorError::Config(format!(
                "Invalid INACTIVITY_TIMEOUT: {}",
                minutes
            ))),
        }
    }

    pub fn dockerhub_credentials(&self) -> Option<SourceCredentials> {
        SourceCredentials::from_parts(self.dockerhub_user.clone(), self.dockerhub_password.clone())
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        self.workers()?;
        self.inactivity_timeout()?;
        crate::logging::parse_level(&self.log_level)?;
        Ok(())
    }
}
