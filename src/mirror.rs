//! Sync job for one configured repository
//!
//! A job walks `resolve -> fetch tags -> filter -> ensure target repository` and then mirrors
//! every remaining tag with `pull -> tag -> push -> [cleanup]`. Anything failing before the tag
//! loop ends the job. Inside the loop a failing step only abandons its tag.

use crate::config::{RepositorySpec, Settings};
use crate::ecr::{EcrBackend, RepositoryBackend, RepositoryCache};
use crate::error::{MirrorError, Result, TagStep};
use crate::filter::filter_tags;
use crate::runtime::{ContainerRuntime, CredentialLookup, DOCKER_HUB_SERVER, RegistryAuth};
use crate::source::{Host, RemoteTag, TagFetcher};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

/// Shared collaborators of every sync job
pub struct SyncContext<B = EcrBackend> {
    pub settings: Arc<Settings>,
    pub cache: Arc<RepositoryCache<B>>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub credentials: Arc<dyn CredentialLookup>,
    pub fetcher: Arc<TagFetcher>,
}

impl<B> Clone for SyncContext<B> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            cache: self.cache.clone(),
            runtime: self.runtime.clone(),
            credentials: self.credentials.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

/// Resolved addresses of one repository job
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub repo: RepositorySpec,
    pub host: Host,
    /// Reference pulled from the source, without tag
    pub source_repository: String,
    /// Repository name created on the target registry
    pub target_name: String,
    /// `{registry}/{target_name}`
    pub target_repository: String,
}

impl SyncJob {
    /// Apply the `name:tag` rule and work out where the images come from and go to
    pub fn prepare(spec: &RepositorySpec, settings: &Settings) -> Result<SyncJob> {
        let repo = spec.resolve();
        let host = Host::parse(repo.host.as_deref())?;
        let source_repository = host.image_repository(&repo);
        let target_name = repo.target_repository_name(&settings.target);
        let target_repository = format!(
            "{}/{}",
            settings.target.registry.trim_end_matches('/'),
            target_name
        );

        Ok(SyncJob {
            repo,
            host,
            source_repository,
            target_name,
            target_repository,
        })
    }

    pub fn source_image(&self, tag: &str) -> String {
        format!("{}:{}", self.source_repository, tag)
    }

    pub fn target_image(&self, tag: &str) -> String {
        format!("{}:{}", self.target_repository, tag)
    }
}

/// Tag outcomes of a finished job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub mirrored: usize,
    pub failed: usize,
}

pub struct Mirror<B = EcrBackend> {
    ctx: SyncContext<B>,
}

impl<B: RepositoryBackend> Mirror<B> {
    pub fn new(ctx: SyncContext<B>) -> Self {
        Self { ctx }
    }

    /// Run the whole job for `spec`. Errors returned here are job-fatal; tag failures are
    /// logged and counted in the report instead.
    pub async fn run(&self, spec: &RepositorySpec) -> Result<SyncReport> {
        let span = info_span!("sync", full_repo = %spec.name);
        self.run_job(spec).instrument(span).await
    }

    async fn run_job(&self, spec: &RepositorySpec) -> Result<SyncReport> {
        let job = SyncJob::prepare(spec, &self.ctx.settings)?;

        let tags = self
            .ctx
            .fetcher
            .fetch_tags(&job.repo, job.host)
            .await
            .map_err(|source| MirrorError::RemoteFetch {
                repository: job.repo.name.clone(),
                source,
            })?;
        debug!(fetched = tags.len(), "Fetched remote tags");

        let tags = filter_tags(tags, &job.repo, Utc::now());
        self.sync_tags(&job, &tags).await
    }

    /// Ensure the target repository, then mirror `tags` in order
    pub async fn sync_tags(&self, job: &SyncJob, tags: &[RemoteTag]) -> Result<SyncReport> {
        info!(repo = %job.repo.name, num_tags = tags.len(), "Starting work");

        self.ctx.cache.ensure(&job.target_name).await?;

        let mut report = SyncReport::default();
        for tag in tags {
            let span = info_span!("tag", repo = %job.repo.name, tag = %tag.name);
            match self.mirror_tag(job, &tag.name).instrument(span.clone()).await {
                Ok(()) => report.mirrored += 1,
                Err(err) => {
                    span.in_scope(|| error!("{}", err));
                    report.failed += 1;
                }
            }
        }

        info!(
            repo = %job.repo.name,
            mirrored = report.mirrored,
            failed = report.failed,
            "Done"
        );
        Ok(report)
    }

    async fn mirror_tag(&self, job: &SyncJob, tag: &str) -> Result<()> {
        info!("Start mirror tag");
        let runtime = &self.ctx.runtime;

        let started = Instant::now();
        info!("Starting docker pull");
        let pull_auth = self.pull_auth(job);
        runtime
            .pull(&job.source_repository, tag, pull_auth.as_ref())
            .await
            .map_err(|e| MirrorError::tag_step(TagStep::Pull, tag, e))?;
        info!("Completed docker pull in {:.1?}", started.elapsed());

        let started = Instant::now();
        info!("Starting docker tag");
        runtime
            .tag(&job.source_image(tag), &job.target_repository, tag)
            .await
            .map_err(|e| MirrorError::tag_step(TagStep::Retag, tag, e))?;
        info!("Completed docker tag in {:.1?}", started.elapsed());

        let started = Instant::now();
        info!("Starting docker push");
        let push_auth = self
            .ctx
            .credentials
            .lookup(self.ctx.settings.target.credentials_registry())
            .await
            .map_err(|e| MirrorError::tag_step(TagStep::Push, tag, e))?;
        runtime
            .push(&job.target_repository, tag, &push_auth)
            .await
            .map_err(|e| MirrorError::tag_step(TagStep::Push, tag, e))?;
        info!("Completed docker push in {:.1?}", started.elapsed());

        if self.ctx.settings.cleanup {
            for image in [job.source_image(tag), job.target_image(tag)] {
                info!("Cleaning images: {}", image);
                runtime
                    .remove(&image)
                    .await
                    .map_err(|e| MirrorError::tag_step(TagStep::Cleanup, tag, e))?;
            }
        }

        Ok(())
    }

    /// Inline credentials only ever apply to the default host
    fn pull_auth(&self, job: &SyncJob) -> Option<RegistryAuth> {
        if job.host != Host::DockerHub {
            return None;
        }
        let creds = self.ctx.settings.dockerhub_credentials.as_ref()?;

        let server_address = match job.repo.private_registry.as_deref() {
            Some(registry) if !registry.is_empty() => registry
                .trim_end_matches('/')
                .split('/')
                .next()
                .unwrap_or(registry)
                .to_string(),
            _ => DOCKER_HUB_SERVER.to_string(),
        };

        Some(RegistryAuth {
            username: creds.username.clone(),
            password: creds.password.clone(),
            server_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SourceCredentials, TargetConfig};
    use crate::ecr::{BackendError, RepositoryPage};
    use crate::error::{CredentialError, RuntimeError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        creates: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RepositoryBackend for CountingBackend {
        async fn create_repository(&self, _name: &str) -> std::result::Result<(), BackendError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BackendError::Api("AccessDeniedException".to_string()))
            } else {
                Ok(())
            }
        }

        async fn describe_repositories(
            &self,
            _next_token: Option<String>,
        ) -> std::result::Result<RepositoryPage, BackendError> {
            Ok(RepositoryPage::default())
        }
    }

    /// Records every call; fails the step named in `fail_on` for the given tag
    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        fail_on: Option<(&'static str, &'static str)>,
        pull_auth: Mutex<Vec<Option<RegistryAuth>>>,
    }

    impl RecordingRuntime {
        fn record(&self, call: String, step: &str, tag: &str) -> std::result::Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(call);
            match self.fail_on {
                Some((s, t)) if s == step && t == tag => {
                    Err(RuntimeError::Execution(std::io::Error::other("boom")))
                }
                _ => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn pull(
            &self,
            repository: &str,
            tag: &str,
            auth: Option<&RegistryAuth>,
        ) -> std::result::Result<(), RuntimeError> {
            self.pull_auth.lock().unwrap().push(auth.cloned());
            self.record(format!("pull {}:{}", repository, tag), "pull", tag)
        }

        async fn tag(
            &self,
            source: &str,
            target_repository: &str,
            tag: &str,
        ) -> std::result::Result<(), RuntimeError> {
            self.record(format!("tag {} {}:{}", source, target_repository, tag), "tag", tag)
        }

        async fn push(
            &self,
            repository: &str,
            tag: &str,
            auth: &RegistryAuth,
        ) -> std::result::Result<(), RuntimeError> {
            self.record(
                format!("push {}:{} as {}", repository, tag, auth.server_address),
                "push",
                tag,
            )
        }

        async fn remove(&self, image: &str) -> std::result::Result<(), RuntimeError> {
            let tag = image.rsplit(':').next().unwrap_or_default();
            self.record(format!("rm {}", image), "rm", tag)
        }
    }

    struct StaticCredentials(Option<RegistryAuth>);

    #[async_trait]
    impl CredentialLookup for StaticCredentials {
        async fn lookup(&self, registry: &str) -> std::result::Result<RegistryAuth, CredentialError> {
            self.0
                .clone()
                .map(|auth| RegistryAuth {
                    server_address: registry.to_string(),
                    ..auth
                })
                .ok_or_else(|| CredentialError::NotFound(registry.to_string()))
        }
    }

    fn settings(registry: &str, cleanup: bool) -> Settings {
        Settings::new(Config {
            cleanup,
            workers: 1,
            repositories: Vec::new(),
            target: TargetConfig {
                registry: registry.to_string(),
                prefix: "hub/".to_string(),
            },
        })
    }

    fn mirror(
        settings: Settings,
        backend: CountingBackend,
        runtime: Arc<RecordingRuntime>,
        creds: Option<RegistryAuth>,
    ) -> Mirror<CountingBackend> {
        Mirror::new(SyncContext {
            settings: Arc::new(settings),
            cache: Arc::new(RepositoryCache::new(backend)),
            runtime,
            credentials: Arc::new(StaticCredentials(creds)),
            fetcher: Arc::new(TagFetcher::new(None).unwrap()),
        })
    }

    fn push_auth() -> Option<RegistryAuth> {
        Some(RegistryAuth {
            username: "AWS".to_string(),
            password: "token".to_string(),
            server_address: String::new(),
        })
    }

    fn spec(name: &str) -> RepositorySpec {
        RepositorySpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    const REGISTRY: &str = "123.dkr.ecr.eu-west-1.amazonaws.com";

    #[test]
    fn test_prepare_embedded_tag() {
        let job = SyncJob::prepare(&spec("redis:latest"), &settings(REGISTRY, false)).unwrap();
        assert_eq!(job.repo.name, "redis");
        assert_eq!(job.repo.match_tags, vec!["latest"]);
        assert_eq!(job.source_repository, "redis");
        assert_eq!(job.target_name, "hub/redis");
        assert_eq!(job.target_image("latest"), format!("{}/hub/redis:latest", REGISTRY));
    }

    #[test]
    fn test_prepare_private_registry_only_changes_source() {
        let mut repo = spec("library/nginx:1.25");
        repo.private_registry = Some("mirror.internal:5000/".to_string());
        let job = SyncJob::prepare(&repo, &settings(REGISTRY, false)).unwrap();
        let copy = job.clone();

        assert_eq!(copy.source_image("1.25"), "mirror.internal:5000/library/nginx:1.25");
        assert_eq!(copy.target_name, "hub/library/nginx");
        assert_eq!(copy.target_repository, job.target_repository);
        assert_eq!(copy.repo.match_tags, vec!["1.25"]);
    }

    #[test]
    fn test_prepare_host_paths() {
        let mut repo = spec("coreos/etcd");
        repo.host = Some("quay.io".to_string());
        let job = SyncJob::prepare(&repo, &settings(REGISTRY, false)).unwrap();
        assert_eq!(job.source_image("v3.5.0"), "quay.io/coreos/etcd:v3.5.0");

        repo.host = Some("registry.example.com".to_string());
        assert!(matches!(
            SyncJob::prepare(&repo, &settings(REGISTRY, false)),
            Err(MirrorError::UnsupportedHost { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_tags_full_sequence() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mirror = mirror(
            settings(REGISTRY, true),
            CountingBackend::default(),
            runtime.clone(),
            push_auth(),
        );
        let job = SyncJob::prepare(&spec("nginx"), &mirror.ctx.settings).unwrap();

        let report = mirror
            .sync_tags(&job, &[RemoteTag::new("1.25")])
            .await
            .unwrap();

        assert_eq!(report, SyncReport { mirrored: 1, failed: 0 });
        assert_eq!(
            runtime.calls(),
            vec![
                "pull nginx:1.25".to_string(),
                format!("tag nginx:1.25 {}/hub/nginx:1.25", REGISTRY),
                format!("push {}/hub/nginx:1.25 as {}", REGISTRY, REGISTRY),
                "rm nginx:1.25".to_string(),
                format!("rm {}/hub/nginx:1.25", REGISTRY),
            ]
        );
        assert!(mirror.ctx.cache.exists("hub/nginx").await);
    }

    #[tokio::test]
    async fn test_failed_step_only_skips_its_tag() {
        let runtime = Arc::new(RecordingRuntime {
            fail_on: Some(("pull", "v2")),
            ..Default::default()
        });
        let mirror = mirror(
            settings(REGISTRY, false),
            CountingBackend::default(),
            runtime.clone(),
            push_auth(),
        );
        let job = SyncJob::prepare(&spec("app"), &mirror.ctx.settings).unwrap();
        let tags = [RemoteTag::new("v3"), RemoteTag::new("v2"), RemoteTag::new("v1")];

        let report = mirror.sync_tags(&job, &tags).await.unwrap();

        assert_eq!(report, SyncReport { mirrored: 2, failed: 1 });
        let calls = runtime.calls();
        // no tag or push for the tag whose pull failed
        assert!(!calls.iter().any(|c| c.starts_with("tag app:v2")));
        assert!(calls.iter().any(|c| c == "pull app:v1"));
        assert!(!calls.iter().any(|c| c.starts_with("rm ")));
    }

    #[tokio::test]
    async fn test_missing_push_credentials_is_tag_failure() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mirror = mirror(
            settings(REGISTRY, false),
            CountingBackend::default(),
            runtime.clone(),
            None,
        );
        let job = SyncJob::prepare(&spec("app"), &mirror.ctx.settings).unwrap();

        let report = mirror
            .sync_tags(&job, &[RemoteTag::new("a"), RemoteTag::new("b")])
            .await
            .unwrap();
        assert_eq!(report, SyncReport { mirrored: 0, failed: 2 });
        assert!(!runtime.calls().iter().any(|c| c.starts_with("push")));
    }

    #[tokio::test]
    async fn test_ensure_failure_aborts_job() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mirror = mirror(
            settings(REGISTRY, false),
            CountingBackend {
                fail: true,
                ..Default::default()
            },
            runtime.clone(),
            push_auth(),
        );
        let job = SyncJob::prepare(&spec("app"), &mirror.ctx.settings).unwrap();

        let err = mirror
            .sync_tags(&job, &[RemoteTag::new("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::RepoEnsure { .. }));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_public_target_push_credentials() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mirror = mirror(
            settings("public.ecr.aws/abc123", false),
            CountingBackend::default(),
            runtime.clone(),
            push_auth(),
        );
        let job = SyncJob::prepare(&spec("app"), &mirror.ctx.settings).unwrap();

        mirror.sync_tags(&job, &[RemoteTag::new("1")]).await.unwrap();
        assert!(
            runtime
                .calls()
                .contains(&"push public.ecr.aws/abc123/hub/app:1 as public.ecr.aws".to_string())
        );
    }

    #[tokio::test]
    async fn test_pull_auth_for_default_host() {
        let runtime = Arc::new(RecordingRuntime::default());
        let settings = settings(REGISTRY, false).with_dockerhub_credentials(
            SourceCredentials::from_parts(Some("user".into()), Some("pass".into())),
        );
        let mirror = mirror(settings, CountingBackend::default(), runtime.clone(), push_auth());

        let mut repo = spec("team/app");
        repo.private_registry = Some("mirror.example.com/".to_string());
        let job = SyncJob::prepare(&repo, &mirror.ctx.settings).unwrap();
        mirror.sync_tags(&job, &[RemoteTag::new("1")]).await.unwrap();

        let auth = runtime.pull_auth.lock().unwrap()[0].clone().unwrap();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.server_address, "mirror.example.com");
        assert_eq!(runtime.calls()[0], "pull mirror.example.com/team/app:1");
    }

    #[tokio::test]
    async fn test_run_unsupported_host() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mirror = mirror(
            settings(REGISTRY, false),
            CountingBackend::default(),
            runtime.clone(),
            push_auth(),
        );
        let mut repo = spec("app");
        repo.host = Some("ghcr.io".to_string());

        let err = mirror.run(&repo).await.unwrap_err();
        assert!(matches!(err, MirrorError::UnsupportedHost { .. }));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_fetch_failure_is_job_fatal() {
        let runtime = Arc::new(RecordingRuntime::default());
        let backend = CountingBackend::default();
        let mirror = mirror(settings(REGISTRY, false), backend, runtime.clone(), push_auth());
        let mut repo = spec("vault");
        repo.remote_tag_source = Some("github".to_string());

        let err = mirror.run(&repo).await.unwrap_err();
        assert!(matches!(err, MirrorError::RemoteFetch { .. }));
        assert_eq!(mirror.ctx.cache.backend().creates.load(Ordering::SeqCst), 0);
    }
}
