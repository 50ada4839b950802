//! Shared HTTP plumbing for the provider clients

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::error::SourceError;

const USER_AGENT: &str = concat!("workforce-pulse/", env!("CARGO_PKG_VERSION"));

/// Upper bound on pages followed for a single listing
pub(crate) const MAX_PAGES: usize = 20;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// GET a JSON document with bearer auth
///
/// 401 and 403 map to [`SourceError::Unauthorized`] so callers can tell an
/// expired token apart from an outage.
pub(crate) async fn get_json(
    http: &reqwest::Client,
    provider: &str,
    token: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<Value, SourceError> {
    tracing::debug!(provider, url, "Provider request");

    let response = http
        .get(url)
        .bearer_auth(token)
        .query(query)
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Unauthorized(provider.to_string()));
    }
    if !status.is_success() {
        return Err(SourceError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }

    response.json().await.map_err(|e| SourceError::Decode {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

/// Array field of a response, empty when absent
pub(crate) fn array_field(body: &Value, key: &str) -> Vec<Value> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
