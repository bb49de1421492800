//! Tag discovery for source repositories
//!
//! Every supported host is a [`Host`] variant, and [`TagSource`] picks the listing strategy
//! for one repository: the Docker Hub paginated API, the Quay v1 API, a flat v2 `tags/list`,
//! or a GitHub tag listing. [`TagFetcher::fetch_tags`] is the single entry point.

pub mod docker_hub;
pub mod github;
pub mod http;
pub mod quay;
pub mod registry_v2;

use crate::config::{RepositorySpec, SourceCredentials};
use crate::error::{FetchError, MirrorError};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::fmt;
use std::time::Duration;

/// Client-level timeout for every listing request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// One tag of a source repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    pub name: String,
    /// Absent for sources without timestamps (v2 `tags/list`, GitHub)
    pub last_updated: Option<DateTime<Utc>>,
}

impl RemoteTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_updated: None,
        }
    }

    pub fn with_timestamp(name: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_updated: Some(last_updated),
        }
    }
}

/// Newest first, undated tags last, ties keep their listing order
pub fn sort_newest_first(tags: &mut [RemoteTag]) {
    tags.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
}

/// Registries images can be mirrored from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    DockerHub,
    Quay,
    Gcr,
    K8sGcr,
}

impl Host {
    pub const ALL: [Host; 4] = [Host::DockerHub, Host::Quay, Host::Gcr, Host::K8sGcr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Host::DockerHub => "hub.docker.com",
            Host::Quay => "quay.io",
            Host::Gcr => "gcr.io",
            Host::K8sGcr => "k8s.gcr.io",
        }
    }

    /// An omitted or empty host means Docker Hub
    pub fn parse(host: Option<&str>) -> Result<Host, MirrorError> {
        let host = match host {
            None => return Ok(Host::DockerHub),
            Some(h) if h.is_empty() => return Ok(Host::DockerHub),
            Some(h) => h,
        };

        Host::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == host)
            .ok_or_else(|| MirrorError::UnsupportedHost {
                host: host.to_string(),
                supported: Host::ALL
                    .iter()
                    .map(|h| h.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Local image reference (without tag) the runtime pulls for `repo`
    pub fn image_repository(&self, repo: &RepositorySpec) -> String {
        match self {
            Host::DockerHub => match repo.private_registry.as_deref() {
                Some(registry) if !registry.is_empty() => {
                    format!("{}/{}", registry.trim_end_matches('/'), repo.name)
                }
                _ => repo.name.clone(),
            },
            other => format!("{}/{}", other.as_str(), repo.name),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URLs of the listing APIs
#[derive(Debug, Clone)]
pub struct SourceEndpoints {
    pub docker_hub_login: String,
    pub docker_hub_registry: String,
    pub quay: String,
    pub gcr: String,
    pub k8s_gcr: String,
    pub github: String,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            docker_hub_login: "https://hub.docker.com".to_string(),
            docker_hub_registry: "https://registry.hub.docker.com".to_string(),
            quay: "https://quay.io".to_string(),
            gcr: "https://gcr.io".to_string(),
            k8s_gcr: "https://k8s.gcr.io".to_string(),
            github: "https://api.github.com".to_string(),
        }
    }
}

impl SourceEndpoints {
    /// Point every API at the same base URL
    pub fn all(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            docker_hub_login: base.clone(),
            docker_hub_registry: base.clone(),
            quay: base.clone(),
            gcr: base.clone(),
            k8s_gcr: base.clone(),
            github: base,
        }
    }
}

/// Listing strategy for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSource {
    DockerHub,
    Quay,
    RegistryV2(Host),
    GitHub {
        owner: String,
        repo: String,
        num_releases: usize,
    },
}

impl TagSource {
    pub fn for_repository(repo: &RepositorySpec, host: Host) -> Result<TagSource, FetchError> {
        match repo.remote_tag_source.as_deref() {
            Some("github") => {
                let num_releases = repo
                    .remote_tag_config_value("num_releases")
                    .and_then(|v| v.parse::<usize>().ok())
                    .ok_or_else(|| {
                        FetchError::InvalidSource(
                            "Invalid/missing int value for remote_tags_config -> num_releases"
                                .to_string(),
                        )
                    })?;
                let owner = repo.remote_tag_config_value("owner").ok_or_else(|| {
                    FetchError::InvalidSource("Missing remote_tags_config -> owner".to_string())
                })?;
                let gh_repo = repo.remote_tag_config_value("repo").ok_or_else(|| {
                    FetchError::InvalidSource("Missing remote_tags_config -> repo".to_string())
                })?;
                Ok(TagSource::GitHub {
                    owner,
                    repo: gh_repo,
                    num_releases,
                })
            }
            Some(other) => Err(FetchError::InvalidSource(format!(
                "Unknown remote_tags_source: {}",
                other
            ))),
            None => Ok(match host {
                Host::DockerHub => TagSource::DockerHub,
                Host::Quay => TagSource::Quay,
                Host::Gcr | Host::K8sGcr => TagSource::RegistryV2(host),
            }),
        }
    }
}

/// Shared HTTP client plus endpoint and credential settings for tag listing
#[derive(Debug, Clone)]
pub struct TagFetcher {
    client: Client,
    endpoints: SourceEndpoints,
    dockerhub_credentials: Option<SourceCredentials>,
}

impl TagFetcher {
    pub fn new(dockerhub_credentials: Option<SourceCredentials>) -> Result<Self, FetchError> {
        Self::with_endpoints(SourceEndpoints::default(), dockerhub_credentials)
    }

    pub fn with_endpoints(
        endpoints: SourceEndpoints,
        dockerhub_credentials: Option<SourceCredentials>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("ecr-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoints,
            dockerhub_credentials,
        })
    }

    /// All tags of `repo` on `host`, newest first where the source has timestamps
    pub async fn fetch_tags(
        &self,
        repo: &RepositorySpec,
        host: Host,
    ) -> Result<Vec<RemoteTag>, FetchError> {
        match TagSource::for_repository(repo, host)? {
            TagSource::DockerHub => {
                docker_hub::list_tags(
                    &self.client,
                    &self.endpoints,
                    &repo.name,
                    self.dockerhub_credentials.as_ref(),
                )
                .await
            }
            TagSource::Quay => quay::list_tags(&self.client, &self.endpoints.quay, &repo.name).await,
            TagSource::RegistryV2(host) => {
                let base = match host {
                    Host::K8sGcr => &self.endpoints.k8s_gcr,
                    _ => &self.endpoints.gcr,
                };
                registry_v2::list_tags(&self.client, base, &repo.name).await
            }
            TagSource::GitHub {
                owner,
                repo: gh_repo,
                num_releases,
            } => {
                github::list_tags(
                    &self.client,
                    &self.endpoints.github,
                    &owner,
                    &gh_repo,
                    num_releases,
                )
                .await
            }
        }
    }
}
