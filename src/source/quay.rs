//! Quay API v1 tag listing, paged by `has_additional`

use super::http::{RequestAuth, decode_json, get_with_retry};
use super::{RemoteTag, sort_newest_first};
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct TagsPage {
    #[serde(default)]
    pub has_additional: bool,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TagEntry {
    pub name: String,
    /// RFC 2822, e.g. `Thu, 09 Nov 2023 12:34:56 -0000`
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl TagEntry {
    fn into_remote_tag(self) -> RemoteTag {
        let last_updated = self
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|d| d.with_timezone(&Utc));
        RemoteTag {
            name: self.name,
            last_updated,
        }
    }
}

pub async fn list_tags(client: &Client, base: &str, name: &str) -> Result<Vec<RemoteTag>, FetchError> {
    let mut tags = Vec::new();
    let mut page = 1;

    loop {
        let url = format!(
            "{}/api/v1/repository/{}/tag/?limit={}&page={}",
            base, name, PAGE_LIMIT, page
        );
        let response = get_with_retry(client, &url, &RequestAuth::Anonymous).await?;
        let body: TagsPage = decode_json(response, &url).await?;

        tags.extend(body.tags.into_iter().map(TagEntry::into_remote_tag));

        if !body.has_additional {
            break;
        }
        page = body.page.max(page) + 1;
    }

    sort_newest_first(&mut tags);
    Ok(tags)
}
