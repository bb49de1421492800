//! Tag filtering: match globs, drop globs, age cutoff, then count truncation

use crate::config::RepositorySpec;
use crate::source::RemoteTag;
use chrono::{DateTime, Utc};
use tracing::debug;

/// `*` matches any run of characters (including none); everything else is literal
pub fn glob_match(pattern: &str, subject: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == subject;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !subject.starts_with(first) {
        return false;
    }

    let mut rest = &subject[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

/// Keep tags matching any match pattern, drop those matching any drop pattern, drop tags older
/// than the age limit, then keep the first `max_tags` of what remains.
///
/// Count truncation relies on the source having sorted newest-first; for sources without
/// timestamps it keeps the first entries in the order the registry returned them.
pub fn filter_tags(tags: Vec<RemoteTag>, repo: &RepositorySpec, now: DateTime<Utc>) -> Vec<RemoteTag> {
    let cutoff = repo
        .max_tag_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .and_then(|age| now.checked_sub_signed(age));

    let mut kept: Vec<RemoteTag> = tags
        .into_iter()
        .filter(|tag| {
            if !repo.match_tags.is_empty()
                && !repo.match_tags.iter().any(|p| glob_match(p, &tag.name))
            {
                debug!(tag = %tag.name, "Dropping tag, it doesn't match any glob pattern");
                return false;
            }

            if let Some(pattern) = repo.drop_tags.iter().find(|p| glob_match(p, &tag.name)) {
                debug!(tag = %tag.name, glob = %pattern, "Dropping tag, it is ignored by glob");
                return false;
            }

            if let (Some(cutoff), Some(updated)) = (cutoff, tag.last_updated) {
                if updated < cutoff {
                    debug!(tag = %tag.name, "Dropping tag, it is older than the max tag age");
                    return false;
                }
            }

            true
        })
        .collect();

    if let Some(max) = repo.max_tag_count() {
        if kept.len() > max {
            debug!("Dropping {} tags, only need {} newest", kept.len() - max, max);
            kept.truncate(max);
        }
    }

    kept
}
