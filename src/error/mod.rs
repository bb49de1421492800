//! Error types for the mirroring engine
//!
//! [`MirrorError`] carries the propagation classes of a run: configuration and cache-build
//! errors stop the process, host/fetch/ensure errors stop one repository job, and
//! [`MirrorError::TagStep`] abandons only a single tag. The leaf errors below it describe
//! what actually went wrong against a remote or the local container runtime.

use std::fmt;
use std::process::ExitStatus;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Missing target registry, unreadable config file, unparsable env value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Repository listing still failing after the backoff budget was spent
    #[error("Could not build ECR cache: {0}")]
    CacheBuild(String),

    #[error("Could not pull images from host: {host}. We support {supported}")]
    UnsupportedHost { host: String, supported: String },

    #[error("Failed to fetch remote tags for {repository}: {source}")]
    RemoteFetch {
        repository: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to create ECR repo {repository}: {message}")]
    RepoEnsure { repository: String, message: String },

    #[error("Failed to {step} image {tag}: {message}")]
    TagStep {
        step: TagStep,
        tag: String,
        message: String,
    },
}

impl MirrorError {
    pub fn tag_step(step: TagStep, tag: &str, err: impl fmt::Display) -> Self {
        MirrorError::TagStep {
            step,
            tag: tag.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error ends the whole run rather than a single job or tag
    pub fn is_pool_fatal(&self) -> bool {
        matches!(self, MirrorError::Config(_) | MirrorError::CacheBuild(_))
    }
}

/// The four per-tag operations of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStep {
    Pull,
    Retag,
    Push,
    Cleanup,
}

impl fmt::Display for TagStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagStep::Pull => "pull",
            TagStep::Retag => "(re)tag",
            TagStep::Push => "push",
            TagStep::Cleanup => "clean",
        };
        f.write_str(name)
    }
}

/// Failures while listing tags from a source registry
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Get {url} failed with {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid source configuration: {0}")]
    InvalidSource(String),
}

/// Failures of the local container runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker terminated with an unknown error: {0}")]
    Execution(#[from] std::io::Error),

    #[error("Docker terminated with a non success exit status code: {status}: {stderr}")]
    ExitStatus { status: ExitStatus, stderr: String },

    #[error("Docker command produced no output for {0:?}, killed")]
    Inactivity(std::time::Duration),

    #[error("Docker credentials error: {0}")]
    Credentials(#[from] CredentialError),
}

/// Failures resolving registry credentials from the docker client configuration
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No auth found for {0}")]
    NotFound(String),

    #[error("Could not read docker config {path}: {message}")]
    Config { path: String, message: String },

    #[error("Credential helper {helper} failed: {message}")]
    Helper { helper: String, message: String },

    #[error("Malformed auth entry for {0}")]
    Malformed(String),
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Config(format!("Could not parse config file: {}", err))
    }
}
