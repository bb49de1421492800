//! Plain Docker Registry v2 `GET /v2/{name}/tags/list`
//!
//! One call, no pagination cursor and no timestamps; the registry's order is kept.

use super::RemoteTag;
use super::http::{RequestAuth, decode_json, get_with_retry};
use crate::error::FetchError;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TagList {
    #[allow(dead_code)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub async fn list_tags(client: &Client, base: &str, name: &str) -> Result<Vec<RemoteTag>, FetchError> {
    let url = format!("{}/v2/{}/tags/list", base, name);
    let response = get_with_retry(client, &url, &RequestAuth::Anonymous).await?;
    let list: TagList = decode_json(response, &url).await?;

    Ok(list.tags.into_iter().map(RemoteTag::new).collect())
}
