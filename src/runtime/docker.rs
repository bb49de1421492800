use super::{ContainerRuntime, RegistryAuth};
use crate::error::RuntimeError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Lines of stderr kept for the error message of a failed command
const STDERR_TAIL: usize = 10;

/// `docker` CLI driven runtime
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    /// Pulls and pushes printing no complete output line for this long are killed
    inactivity_timeout: Duration,
}

impl DockerCli {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            binary: "docker".to_string(),
            inactivity_timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Daemon name and version, proving the daemon is reachable
    pub async fn server_info(&self) -> Result<String, RuntimeError> {
        let output = Command::new(&self.binary)
            .args(["info", "--format", "{{.Name}} @ {{.ServerVersion}}"])
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(RuntimeError::ExitStatus {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exec(
        &self,
        args: &[&str],
        config_dir: Option<&Path>,
        action: &str,
        inactivity: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = config_dir {
            cmd.arg("--config").arg(dir);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RuntimeError::Execution(std::io::Error::other("docker stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            RuntimeError::Execution(std::io::Error::other("docker stderr not captured"))
        })?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut stderr_tail: Vec<String> = Vec::new();

        while !(stdout_done && stderr_done) {
            let next_line = async {
                tokio::select! {
                    line = stdout_lines.next_line(), if !stdout_done => (false, line),
                    line = stderr_lines.next_line(), if !stderr_done => (true, line),
                }
            };

            let next = match inactivity {
                Some(limit) => match tokio::time::timeout(limit, next_line).await {
                    Ok(next) => next,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(RuntimeError::Inactivity(limit));
                    }
                },
                None => next_line.await,
            };

            match next {
                (is_stderr, Ok(Some(line))) => {
                    debug!(docker_action = action, "{}", line.trim_end());
                    if is_stderr {
                        if stderr_tail.len() == STDERR_TAIL {
                            stderr_tail.remove(0);
                        }
                        stderr_tail.push(line);
                    }
                }
                (false, Ok(None)) => stdout_done = true,
                (true, Ok(None)) => stderr_done = true,
                (_, Err(e)) => {
                    let _ = child.kill().await;
                    return Err(RuntimeError::Execution(e));
                }
            }
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::ExitStatus {
                status,
                stderr: stderr_tail.join("\n"),
            })
        }
    }
}

/// Docker client config holding exactly one set of credentials
pub fn auth_config_json(auth: &RegistryAuth) -> serde_json::Value {
    let encoded = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    json!({
        "auths": {
            auth.server_address.as_str(): { "auth": encoded }
        }
    })
}

/// Temporary `--config` directory for one authenticated command
fn write_auth_config(auth: &RegistryAuth) -> Result<tempfile::TempDir, RuntimeError> {
    let dir = tempfile::Builder::new().prefix("ecr-mirror-").tempdir()?;
    let content = serde_json::to_vec(&auth_config_json(auth))
        .map_err(|e| RuntimeError::Execution(std::io::Error::other(e)))?;
    std::fs::write(dir.path().join("config.json"), content)?;
    Ok(dir)
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(
        &self,
        repository: &str,
        tag: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError> {
        let image = format!("{}:{}", repository, tag);
        let config_dir = auth.map(write_auth_config).transpose()?;
        if config_dir.is_some() {
            info!("Pulling with inline source registry credentials");
        }

        self.exec(
            &["pull", &image],
            config_dir.as_ref().map(|d| d.path()),
            "pull",
            Some(self.inactivity_timeout),
        )
        .await
    }

    async fn tag(&self, source: &str, target_repository: &str, tag: &str) -> Result<(), RuntimeError> {
        let target = format!("{}:{}", target_repository, tag);
        self.exec(&["tag", source, &target], None, "tag", None).await
    }

    async fn push(&self, repository: &str, tag: &str, auth: &RegistryAuth) -> Result<(), RuntimeError> {
        let image = format!("{}:{}", repository, tag);
        let config_dir = write_auth_config(auth)?;

        self.exec(
            &["push", &image],
            Some(config_dir.path()),
            "push",
            Some(self.inactivity_timeout),
        )
        .await
    }

    async fn remove(&self, image: &str) -> Result<(), RuntimeError> {
        self.exec(&["image", "rm", image], None, "remove", None).await
    }
}
