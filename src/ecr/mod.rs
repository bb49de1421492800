//! Target repository management
//!
//! [`RepositoryCache`] remembers which repositories already exist in the target registry so a
//! sync job only calls the create API for repositories it has never seen. It is filled once at
//! startup by [`RepositoryCache::build_cache_with_backoff`] and only ever grows afterwards.
//!
//! The remote API is reached through [`RepositoryBackend`]; [`EcrBackend`] is the production
//! implementation and picks the private or public ECR client from the target registry address.

/// CreateRepository/DescribeRepositories over one of the ECR SDK crates; the private and public
/// APIs share operation shapes but not types
macro_rules! repository_api {
    ($sdk:ident) => {
        use super::{BackendError, RepositoryPage};
        use $sdk::Client;
        use $sdk::error::DisplayErrorContext;

        pub async fn create_repository(client: &Client, name: &str) -> Result<(), BackendError> {
            match client.create_repository().repository_name(name).send().await {
                Ok(_) => Ok(()),
                Err(err) => {
                    let exists = err
                        .as_service_error()
                        .is_some_and(|e| e.is_repository_already_exists_exception());
                    if exists {
                        Err(BackendError::AlreadyExists)
                    } else {
                        Err(BackendError::Api(DisplayErrorContext(&err).to_string()))
                    }
                }
            }
        }

        pub async fn describe_repositories(
            client: &Client,
            next_token: Option<String>,
        ) -> Result<RepositoryPage, BackendError> {
            let output = client
                .describe_repositories()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| BackendError::Api(DisplayErrorContext(&e).to_string()))?;

            Ok(RepositoryPage {
                names: output
                    .repositories()
                    .iter()
                    .filter_map(|r| r.repository_name().map(str::to_string))
                    .collect(),
                next_token: output.next_token().map(str::to_string),
            })
        }
    };
}

pub mod private;
pub mod public;

use crate::common::retry::{RetryConfig, retry_notify};
use crate::config::{ECR_PUBLIC_REGION, RegistryClass};
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::info;

/// One page of a repository listing
#[derive(Debug, Clone, Default)]
pub struct RepositoryPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("repository already exists")]
    AlreadyExists,
    #[error("{0}")]
    Api(String),
}

/// Remote create/list calls of a registry-management API
#[async_trait]
pub trait RepositoryBackend: Send + Sync {
    async fn create_repository(&self, name: &str) -> std::result::Result<(), BackendError>;

    async fn describe_repositories(
        &self,
        next_token: Option<String>,
    ) -> std::result::Result<RepositoryPage, BackendError>;
}

/// Private or public ECR, chosen once from the target registry address
#[derive(Debug, Clone)]
pub enum EcrBackend {
    Private(aws_sdk_ecr::Client),
    Public(aws_sdk_ecrpublic::Client),
}

impl EcrBackend {
    /// Load AWS configuration from the environment; the public API is pinned to its region
    pub async fn from_env(class: RegistryClass) -> Self {
        match class {
            RegistryClass::Private => {
                let sdk_config = aws_config::load_from_env().await;
                EcrBackend::Private(aws_sdk_ecr::Client::new(&sdk_config))
            }
            RegistryClass::Public => {
                let sdk_config = aws_config::from_env()
                    .region(aws_sdk_ecrpublic::config::Region::new(ECR_PUBLIC_REGION))
                    .load()
                    .await;
                EcrBackend::Public(aws_sdk_ecrpublic::Client::new(&sdk_config))
            }
        }
    }

    pub fn class(&self) -> RegistryClass {
        match self {
            EcrBackend::Private(_) => RegistryClass::Private,
            EcrBackend::Public(_) => RegistryClass::Public,
        }
    }
}

#[async_trait]
impl RepositoryBackend for EcrBackend {
    async fn create_repository(&self, name: &str) -> std::result::Result<(), BackendError> {
        match self {
            EcrBackend::Private(client) => private::create_repository(client, name).await,
            EcrBackend::Public(client) => public::create_repository(client, name).await,
        }
    }

    async fn describe_repositories(
        &self,
        next_token: Option<String>,
    ) -> std::result::Result<RepositoryPage, BackendError> {
        match self {
            EcrBackend::Private(client) => private::describe_repositories(client, next_token).await,
            EcrBackend::Public(client) => public::describe_repositories(client, next_token).await,
        }
    }
}

/// Set of repository names known to exist in the target registry
pub struct RepositoryCache<B = EcrBackend> {
    backend: B,
    repositories: Mutex<HashSet<String>>,
}

impl<B: RepositoryBackend> RepositoryCache<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            repositories: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.repositories.lock().await.contains(name)
    }

    pub async fn len(&self) -> usize {
        self.repositories.lock().await.len()
    }

    /// Create `name` unless it is already known. The set stays locked across the check and
    /// the create call, so two jobs never create the same repository.
    pub async fn ensure(&self, name: &str) -> Result<()> {
        let mut repositories = self.repositories.lock().await;
        if repositories.contains(name) {
            return Ok(());
        }
        self.create_locked(&mut repositories, name).await
    }

    /// Create `name` unconditionally; the cache is only updated on success
    pub async fn create(&self, name: &str) -> Result<()> {
        let mut repositories = self.repositories.lock().await;
        self.create_locked(&mut repositories, name).await
    }

    async fn create_locked(&self, repositories: &mut HashSet<String>, name: &str) -> Result<()> {
        info!(repository = name, "Creating ECR repository");

        match self.backend.create_repository(name).await {
            Ok(()) => {}
            Err(BackendError::AlreadyExists) => {
                info!(repository = name, "ECR repository already exists");
            }
            Err(BackendError::Api(message)) => {
                return Err(MirrorError::RepoEnsure {
                    repository: name.to_string(),
                    message,
                });
            }
        }

        repositories.insert(name.to_string());
        Ok(())
    }

    /// List every repository page by page and add each name. Re-running only re-adds.
    pub async fn build_cache(&self) -> std::result::Result<(), BackendError> {
        info!("Loading list of ECR repositories");

        let mut next_token = None;
        let mut pages = 0usize;
        loop {
            let page = self.backend.describe_repositories(next_token).await?;
            pages += 1;

            self.repositories.lock().await.extend(page.names);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        info!(pages, repositories = self.len().await, "Done loading ECR repositories");
        Ok(())
    }

    /// [`build_cache`](Self::build_cache) retried with exponential backoff; giving up is fatal
    pub async fn build_cache_with_backoff(&self, config: RetryConfig) -> Result<()> {
        retry_notify(config, move || self.build_cache())
            .await
            .map_err(|e| MirrorError::CacheBuild(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeBackend {
        creates: AtomicUsize,
        describes: AtomicUsize,
        fail_describes: usize,
        fail_create: bool,
        pages: Vec<Vec<&'static str>>,
    }

    #[async_trait]
    impl RepositoryBackend for FakeBackend {
        async fn create_repository(&self, _name: &str) -> std::result::Result<(), BackendError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                Err(BackendError::Api("AccessDenied".to_string()))
            } else {
                Ok(())
            }
        }

        async fn describe_repositories(
            &self,
            next_token: Option<String>,
        ) -> std::result::Result<RepositoryPage, BackendError> {
            let call = self.describes.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_describes {
                return Err(BackendError::Api("throttled".to_string()));
            }

            let index: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let names = self.pages.get(index).cloned().unwrap_or_default();
            let next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(RepositoryPage {
                names: names.into_iter().map(String::from).collect(),
                next_token,
            })
        }
    }

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let cache = RepositoryCache::new(FakeBackend::default());
        cache.ensure("hub/redis").await.unwrap();
        cache.ensure("hub/redis").await.unwrap();

        assert_eq!(cache.backend().creates.load(Ordering::SeqCst), 1);
        assert!(cache.exists("hub/redis").await);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_cache_unchanged() {
        let cache = RepositoryCache::new(FakeBackend {
            fail_create: true,
            ..Default::default()
        });
        let err = cache.create("hub/redis").await.unwrap_err();

        assert!(matches!(err, MirrorError::RepoEnsure { .. }));
        assert!(!cache.exists("hub/redis").await);
    }

    #[tokio::test]
    async fn test_build_cache_follows_pages() {
        let cache = RepositoryCache::new(FakeBackend {
            pages: vec![vec!["a", "b"], vec!["c"], vec!["d"]],
            ..Default::default()
        });
        cache.build_cache().await.unwrap();

        assert_eq!(cache.len().await, 4);
        assert!(cache.exists("d").await);
        assert_eq!(cache.backend().describes.load(Ordering::SeqCst), 3);

        // known repositories are not created again
        cache.ensure("c").await.unwrap();
        assert_eq!(cache.backend().creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_cache_with_backoff_recovers() {
        let cache = RepositoryCache::new(FakeBackend {
            fail_describes: 2,
            pages: vec![vec!["a"]],
            ..Default::default()
        });
        cache
            .build_cache_with_backoff(RetryConfig::default())
            .await
            .unwrap();

        assert!(cache.exists("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_cache_with_backoff_gives_up() {
        let cache = RepositoryCache::new(FakeBackend {
            fail_describes: usize::MAX,
            ..Default::default()
        });
        let err = cache
            .build_cache_with_backoff(RetryConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::CacheBuild(_)));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_same_name() {
        let cache = Arc::new(RepositoryCache::new(FakeBackend::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure("hub/nginx").await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(cache.backend().creates.load(Ordering::SeqCst), 1);
    }
}
