//! Startup sequence and dispatch of a mirror run

use crate::cli::args::Args;
use crate::common::retry::RetryConfig;
use crate::concurrency::{DispatchSummary, Dispatcher};
use crate::config::{Config, RepositorySpec, Settings};
use crate::ecr::{EcrBackend, RepositoryBackend, RepositoryCache};
use crate::error::{MirrorError, Result};
use crate::mirror::{Mirror, SyncContext};
use crate::runtime::{DockerCli, DockerConfigCredentials};
use crate::source::TagFetcher;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct Runner {
    args: Args,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        args.validate()?;
        Ok(Self { args })
    }

    /// Build the immutable settings from the config file and the overrides
    pub fn settings(&self) -> Result<Settings> {
        let config = Config::load(&self.args.config_file)?;

        Ok(Settings::new(config)
            .with_workers(self.args.workers()?)
            .with_name_prefix(self.args.prefix.clone())
            .with_inactivity_timeout(self.args.inactivity_timeout()?)
            .with_dockerhub_credentials(self.args.dockerhub_credentials()))
    }

    /// Errors returned here are pool-fatal; job and tag failures only show up in the log
    pub async fn run(&self) -> Result<DispatchSummary> {
        let start_time = Instant::now();
        let settings = Arc::new(self.settings()?);
        info!(
            registry = %settings.target.registry,
            repositories = settings.repositories.len(),
            workers = settings.workers,
            "Loaded configuration"
        );

        let docker = DockerCli::new(settings.inactivity_timeout);
        let server = docker
            .server_info()
            .await
            .map_err(|e| MirrorError::Config(format!("Docker daemon not reachable: {}", e)))?;
        info!("Connected to docker daemon: {}", server);

        let backend = EcrBackend::from_env(settings.registry_class()).await;
        info!(class = ?backend.class(), "Using ECR repository API");

        let fetcher = TagFetcher::new(settings.dockerhub_credentials.clone())
            .map_err(|e| MirrorError::Config(format!("Could not build HTTP client: {}", e)))?;

        let ctx = SyncContext {
            settings: settings.clone(),
            cache: Arc::new(RepositoryCache::new(backend)),
            runtime: Arc::new(docker),
            credentials: Arc::new(DockerConfigCredentials::from_env()),
            fetcher: Arc::new(fetcher),
        };

        let summary = run_with(ctx, RetryConfig::default()).await?;
        info!(
            repositories = summary.acknowledged,
            failed = summary.failed,
            "Done in {:.1?}",
            start_time.elapsed()
        );
        Ok(summary)
    }
}

/// Fill the repository cache, then sync every selected repository on the worker pool
pub async fn run_with<B>(ctx: SyncContext<B>, retry: RetryConfig) -> Result<DispatchSummary>
where
    B: RepositoryBackend + 'static,
{
    // no job may run against a half-built cache
    ctx.cache.build_cache_with_backoff(retry).await?;

    let jobs: Vec<RepositorySpec> = ctx.settings.selected_repositories().cloned().collect();
    let dispatcher = Dispatcher::new(ctx.settings.workers);
    info!(
        selected = jobs.len(),
        workers = dispatcher.workers(),
        "Dispatching repositories"
    );

    let mirror = Arc::new(Mirror::new(ctx.clone()));
    let summary = dispatcher
        .run(jobs, move |repo: RepositorySpec| {
            let mirror = Arc::clone(&mirror);
            async move { mirror.run(&repo).await }
        })
        .await;

    Ok(summary)
}
