//! Configuration document, repository specs and the immutable run settings

use crate::error::{MirrorError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Registry addresses starting with this are served by the public ECR API
pub const ECR_PUBLIC_REGISTRY_PREFIX: &str = "public.ecr.aws";

/// Region the public ECR API is only available in
pub const ECR_PUBLIC_REGION: &str = "us-east-1";

/// The YAML document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cleanup: bool,
    /// 0 means one worker per available CPU
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub repositories: Vec<RepositorySpec>,
    #[serde(default)]
    pub target: TargetConfig,
}

/// Where repositories are mirrored to
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub prefix: String,
}

/// Selects which repository-management API handles the target registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryClass {
    Private,
    Public,
}

/// A single source repository to mirror
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositorySpec {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, rename = "match_tag")]
    pub match_tags: Vec<String>,
    #[serde(default, rename = "ignore_tag")]
    pub drop_tags: Vec<String>,
    #[serde(default)]
    pub max_tags: Option<usize>,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub max_tag_age: Option<Duration>,
    #[serde(default)]
    pub private_registry: Option<String>,
    #[serde(default)]
    pub target_prefix: Option<String>,
    #[serde(default, rename = "remote_tags_source")]
    pub remote_tag_source: Option<String>,
    #[serde(default, rename = "remote_tags_config")]
    pub remote_tag_config: BTreeMap<String, serde_yaml::Value>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("Could not read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.registry.trim().is_empty() {
            return Err(MirrorError::Config(
                "Missing `target -> registry` yaml config".to_string(),
            ));
        }
        if let Some(repo) = self.repositories.iter().find(|r| r.name.trim().is_empty()) {
            return Err(MirrorError::Config(format!(
                "Repository entry with empty name (host: {:?})",
                repo.host
            )));
        }
        Ok(())
    }
}

impl TargetConfig {
    pub fn registry_class(&self) -> RegistryClass {
        if self.registry.starts_with(ECR_PUBLIC_REGISTRY_PREFIX) {
            RegistryClass::Public
        } else {
            RegistryClass::Private
        }
    }

    /// Registry key to look push credentials up under
    pub fn credentials_registry(&self) -> &str {
        match self.registry_class() {
            RegistryClass::Public => ECR_PUBLIC_REGISTRY_PREFIX,
            RegistryClass::Private => &self.registry,
        }
    }
}

impl RepositorySpec {
    /// Apply the `name:tag` shorthand: the tag becomes the only match pattern
    pub fn resolve(&self) -> RepositorySpec {
        let mut repo = self.clone();
        if let Some((name, tag)) = self.name.split_once(':') {
            repo.name = name.to_string();
            repo.match_tags = vec![tag.to_string()];
        }
        repo
    }

    /// Name of the repository on the target: override prefix or global prefix, then the name.
    /// `private_registry` only changes where the image is pulled from, never the target name.
    pub fn target_repository_name(&self, target: &TargetConfig) -> String {
        let prefix = self.target_prefix.as_deref().unwrap_or(&target.prefix);
        format!("{}{}", prefix, self.name)
    }

    /// Count limit, 0 meaning unlimited
    pub fn max_tag_count(&self) -> Option<usize> {
        self.max_tags.filter(|n| *n > 0)
    }

    /// Scalar value of `remote_tags_config`, whatever YAML type it was written as
    pub fn remote_tag_config_value(&self, key: &str) -> Option<String> {
        match self.remote_tag_config.get(key)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Inline credentials for the default source host
#[derive(Clone, PartialEq, Eq)]
pub struct SourceCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SourceCredentials {
    /// Only a complete pair counts
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self { username, password })
            }
            _ => None,
        }
    }
}

/// Everything a run needs, built once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: TargetConfig,
    pub cleanup: bool,
    pub workers: usize,
    pub repositories: Vec<RepositorySpec>,
    /// Only repositories whose name starts with this are run
    pub name_prefix: Option<String>,
    pub inactivity_timeout: Duration,
    pub dockerhub_credentials: Option<SourceCredentials>,
}

impl Settings {
    pub fn new(config: Config) -> Self {
        let workers = if config.workers == 0 {
            default_workers()
        } else {
            config.workers
        };

        Self {
            target: config.target,
            cleanup: config.cleanup,
            workers,
            repositories: config.repositories,
            name_prefix: None,
            inactivity_timeout: Duration::from_secs(60),
            dockerhub_credentials: None,
        }
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(w) = workers.filter(|w| *w > 0) {
            self.workers = w;
        }
        self
    }

    pub fn with_name_prefix(mut self, prefix: Option<String>) -> Self {
        self.name_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_dockerhub_credentials(mut self, creds: Option<SourceCredentials>) -> Self {
        self.dockerhub_credentials = creds;
        self
    }

    pub fn registry_class(&self) -> RegistryClass {
        self.target.registry_class()
    }

    /// Configured repositories that pass the name-prefix selector
    pub fn selected_repositories(&self) -> impl Iterator<Item = &RepositorySpec> {
        self.repositories.iter().filter(|repo| match &self.name_prefix {
            Some(prefix) => repo.name.starts_with(prefix.as_str()),
            None => true,
        })
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
