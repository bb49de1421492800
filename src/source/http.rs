//! Retrying GET for registry listing endpoints, with `X-RateLimit-Reset` aware sleeps

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{info, warn};

/// Attempts per page request
pub const MAX_RETRIES: usize = 5;

/// Sleep used when a 429 carries no usable reset header
pub const DEFAULT_SLEEP_DURATION: Duration = Duration::from_secs(60);

pub const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// Seconds until the Unix timestamp `rate_limit_reset`, never negative.
/// Unparsable input yields [`DEFAULT_SLEEP_DURATION`].
pub fn sleep_time(rate_limit_reset: &str, now: DateTime<Utc>) -> Duration {
    let reset = match rate_limit_reset.trim().parse::<i64>() {
        Ok(reset) => reset,
        Err(_) => return DEFAULT_SLEEP_DURATION,
    };

    let remaining = reset - now.timestamp();
    if remaining <= 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(remaining as u64)
    }
}

/// How a request authenticates, if at all
#[derive(Debug, Clone, Default)]
pub enum RequestAuth {
    #[default]
    Anonymous,
    /// Docker Hub login token, sent as `Authorization: JWT {token}`
    Jwt(String),
}

/// GET `url`, retrying transport errors, non-2xx statuses and rate limits up to
/// [`MAX_RETRIES`] times. Rate-limited attempts sleep until the advertised reset first.
pub async fn get_with_retry(
    client: &Client,
    url: &str,
    auth: &RequestAuth,
) -> Result<Response, FetchError> {
    let mut retries = MAX_RETRIES;
    let mut last_error = None;

    while retries > 0 {
        let mut request = client.get(url);
        if let RequestAuth::Jwt(token) = auth {
            request = request.header(reqwest::header::AUTHORIZATION, format!("JWT {}", token));
        }

        match request.send().await {
            Err(e) => {
                warn!(error = %e, "Failed to get {}, retrying", url);
                last_error = Some(FetchError::Network(e));
            }
            Ok(res) if res.status() == StatusCode::TOO_MANY_REQUESTS => {
                let reset = res
                    .headers()
                    .get(RATE_LIMIT_RESET_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let sleep = sleep_time(reset, Utc::now());
                info!("Rate limited on {}, sleeping for {:?}", url, sleep);
                tokio::time::sleep(sleep).await;
                last_error = Some(FetchError::Status {
                    url: url.to_string(),
                    status: res.status().as_u16(),
                });
            }
            Ok(res) if !res.status().is_success() => {
                warn!("Get {} failed with {}, retrying", url, res.status().as_u16());
                last_error = Some(FetchError::Status {
                    url: url.to_string(),
                    status: res.status().as_u16(),
                });
            }
            Ok(res) => return Ok(res),
        }

        retries -= 1;
    }

    Err(last_error.unwrap_or(FetchError::Status {
        url: url.to_string(),
        status: 0,
    }))
}

/// Read and decode a JSON body, naming the URL on failure
pub async fn decode_json<T: serde::de::DeserializeOwned>(
    response: Response,
    url: &str,
) -> Result<T, FetchError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
