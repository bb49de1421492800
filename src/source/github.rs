//! Tag names taken from a GitHub repository instead of the image registry

use super::RemoteTag;
use super::http::{RequestAuth, decode_json, get_with_retry};
use crate::error::FetchError;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GitTag {
    name: String,
}

/// `v1.2.3` is mirrored as `1.2.3`
pub fn strip_version_prefix(name: &str) -> &str {
    name.strip_prefix('v').unwrap_or(name)
}

pub async fn list_tags(
    client: &Client,
    base: &str,
    owner: &str,
    repo: &str,
    num_releases: usize,
) -> Result<Vec<RemoteTag>, FetchError> {
    let url = format!("{}/repos/{}/{}/tags?per_page={}", base, owner, repo, num_releases);
    let response = get_with_retry(client, &url, &RequestAuth::Anonymous).await?;
    let tags: Vec<GitTag> = decode_json(response, &url).await?;

    Ok(tags
        .into_iter()
        .take(num_releases)
        .map(|t| RemoteTag::new(strip_version_prefix(&t.name)))
        .collect())
}
