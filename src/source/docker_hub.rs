//! Docker Hub tag listing
//!
//! `GET /v2/repositories/{namespace}/{name}/tags/?page_size=2048`, following `next` until it
//! is null. With credentials, a JWT is obtained first from `POST /v2/users/login/`.

use super::http::{RequestAuth, decode_json, get_with_retry};
use super::{RemoteTag, SourceEndpoints, sort_newest_first};
use crate::config::SourceCredentials;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

pub const PAGE_SIZE: usize = 2048;

#[derive(Debug, Deserialize)]
pub struct TagsPage {
    #[serde(default)]
    pub count: u64,
    pub next: Option<String>,
    #[allow(dead_code)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TagEntry {
    pub name: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Official images live under the `library` namespace
pub fn full_repository_name(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    }
}

pub async fn login(
    client: &Client,
    login_base: &str,
    credentials: &SourceCredentials,
) -> Result<String, FetchError> {
    let url = format!("{}/v2/users/login/", login_base);
    let response = client
        .post(&url)
        .json(&LoginRequest {
            username: &credentials.username,
            password: &credentials.password,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FetchError::Auth(format!(
            "Docker Hub login failed with status {}",
            response.status()
        )));
    }

    let login: LoginResponse = decode_json(response, &url).await?;
    login
        .token
        .ok_or_else(|| FetchError::Auth("Docker Hub login response carried no token".to_string()))
}

pub async fn list_tags(
    client: &Client,
    endpoints: &SourceEndpoints,
    name: &str,
    credentials: Option<&SourceCredentials>,
) -> Result<Vec<RemoteTag>, FetchError> {
    let auth = match credentials {
        Some(creds) => {
            info!("Getting tags using docker hub credentials from environment");
            RequestAuth::Jwt(login(client, &endpoints.docker_hub_login, creds).await?)
        }
        None => RequestAuth::Anonymous,
    };

    let mut url = format!(
        "{}/v2/repositories/{}/tags/?page_size={}",
        endpoints.docker_hub_registry,
        full_repository_name(name),
        PAGE_SIZE
    );
    let mut tags = Vec::new();

    loop {
        let response = get_with_retry(client, &url, &auth).await?;
        let page: TagsPage = decode_json(response, &url).await?;
        debug!(
            count = page.count,
            page_items = page.results.len(),
            "Fetched Docker Hub tag page"
        );

        tags.extend(page.results.into_iter().map(|entry| RemoteTag {
            name: entry.name,
            last_updated: entry.last_updated,
        }));

        match page.next {
            Some(next) if !next.is_empty() => {
                url = Url::parse(&next)
                    .map_err(|e| FetchError::Decode {
                        url: url.clone(),
                        message: format!("invalid next page cursor {}: {}", next, e),
                    })?
                    .to_string();
            }
            _ => break,
        }
    }

    sort_newest_first(&mut tags);
    Ok(tags)
}
