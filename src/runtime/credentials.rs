//! Push credentials from the docker client configuration
//!
//! Resolution order for a registry: an inline `auths` entry, then a per-registry
//! `credHelpers` entry, then the global `credsStore`. Helpers are the
//! `docker-credential-<name>` binaries (osxkeychain, secretservice, ecr-login, ...).

use super::{CredentialLookup, RegistryAuth};
use crate::error::CredentialError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct DockerConfigFile {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    pub creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    pub cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthEntry {
    pub auth: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Strip scheme and path so `https://index.docker.io/v1/` and `index.docker.io` compare equal
fn normalize_server(server: &str) -> &str {
    let server = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    server.split('/').next().unwrap_or(server)
}

impl DockerConfigFile {
    fn find_auth(&self, registry: &str) -> Option<&AuthEntry> {
        self.auths.get(registry).or_else(|| {
            let wanted = normalize_server(registry);
            self.auths
                .iter()
                .find(|(server, _)| normalize_server(server) == wanted)
                .map(|(_, entry)| entry)
        })
    }

    fn helper_for(&self, registry: &str) -> Option<&str> {
        self.cred_helpers
            .get(registry)
            .or_else(|| self.cred_helpers.get(normalize_server(registry)))
            .or(self.creds_store.as_ref())
            .map(String::as_str)
            .filter(|helper| !helper.is_empty())
    }
}

impl AuthEntry {
    fn decode(&self, registry: &str) -> Result<Option<RegistryAuth>, CredentialError> {
        if let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|_| CredentialError::Malformed(registry.to_string()))?;
            let decoded =
                String::from_utf8(decoded).map_err(|_| CredentialError::Malformed(registry.to_string()))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| CredentialError::Malformed(registry.to_string()))?;
            return Ok(Some(RegistryAuth {
                username: username.to_string(),
                password: password.to_string(),
                server_address: registry.to_string(),
            }));
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(RegistryAuth {
                username: username.clone(),
                password: password.clone(),
                server_address: registry.to_string(),
            })),
            _ => Ok(None),
        }
    }
}

/// Reads `config.json` of the docker client on every lookup
#[derive(Debug, Clone)]
pub struct DockerConfigCredentials {
    path: PathBuf,
}

impl DockerConfigCredentials {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`
    pub fn from_env() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
            .unwrap_or_else(|| PathBuf::from(".docker"));
        Self::new(dir.join("config.json"))
    }

    async fn load(&self) -> Result<DockerConfigFile, CredentialError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CredentialError::Config {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|e| CredentialError::Config {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Ask `docker-credential-<helper>` for the credentials of `registry`
pub async fn run_helper(helper: &str, registry: &str) -> Result<RegistryAuth, CredentialError> {
    let binary = format!("docker-credential-{}", helper);
    let helper_error = |message: String| CredentialError::Helper {
        helper: binary.clone(),
        message,
    };

    let mut child = Command::new(&binary)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| helper_error(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(registry.as_bytes())
            .await
            .map_err(|e| helper_error(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| helper_error(e.to_string()))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Err(CredentialError::NotFound(registry.to_string()));
        }
        return Err(helper_error(stdout.trim().to_string()));
    }

    let response: HelperResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| helper_error(e.to_string()))?;
    Ok(RegistryAuth {
        username: response.username,
        password: response.secret,
        server_address: registry.to_string(),
    })
}

#[async_trait]
impl CredentialLookup for DockerConfigCredentials {
    async fn lookup(&self, registry: &str) -> Result<RegistryAuth, CredentialError> {
        let config = self.load().await?;

        if let Some(entry) = config.find_auth(registry) {
            if let Some(auth) = entry.decode(registry)? {
                debug!(registry, "Using inline docker config credentials");
                return Ok(auth);
            }
        }

        match config.helper_for(registry) {
            Some(helper) => {
                debug!(registry, helper, "Using docker credential helper");
                run_helper(helper, registry).await
            }
            None => Err(CredentialError::NotFound(registry.to_string())),
        }
    }
}
