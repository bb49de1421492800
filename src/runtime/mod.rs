//! Local container runtime and registry credentials
//!
//! The mirror only asks the runtime to pull, tag, push and remove images and looks at whether
//! that worked; the image transfer itself is the runtime's business.

pub mod credentials;
pub mod docker;

use crate::error::{CredentialError, RuntimeError};
use async_trait::async_trait;

pub use credentials::DockerConfigCredentials;
pub use docker::DockerCli;

/// Server key the docker client stores Docker Hub credentials under
pub const DOCKER_HUB_SERVER: &str = "https://index.docker.io/v1/";

/// Username/password for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Image operations a sync job needs from the local runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `repository:tag`
    async fn pull(
        &self,
        repository: &str,
        tag: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError>;

    /// Tag the local `source` image as `target_repository:tag`, replacing any existing tag
    async fn tag(&self, source: &str, target_repository: &str, tag: &str) -> Result<(), RuntimeError>;

    /// Push `repository:tag`
    async fn push(&self, repository: &str, tag: &str, auth: &RegistryAuth) -> Result<(), RuntimeError>;

    /// Remove the local image reference `image`
    async fn remove(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Resolves push credentials for a registry
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn lookup(&self, registry: &str) -> Result<RegistryAuth, CredentialError>;
}
