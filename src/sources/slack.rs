//! Slack Web API fetcher
//!
//! Slack answers most errors with HTTP 200 and `{"ok": false, "error": ...}`,
//! so every body is checked before use.

use async_trait::async_trait;
use serde_json::Value;

use super::http::{array_field, get_json, MAX_PAGES};
use super::{Credentials, DataSource, FetchWindow, Provider};
use crate::error::SourceError;
use crate::schema::{RawEventBatch, SourceType};

const PROVIDER: &str = "slack";
const PAGE_LIMIT: &str = "200";
const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim,im";
/// Slack error codes that mean the token must be refreshed
const AUTH_ERRORS: [&str; 5] = [
    "invalid_auth",
    "not_authed",
    "token_expired",
    "token_revoked",
    "account_inactive",
];

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
}

impl SlackClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        token: &str,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<Value, SourceError> {
        let url = format!("{}/{}", self.base_url, method);
        let body = get_json(&self.http, PROVIDER, token, &url, query).await?;
        check_ok(body)
    }

    /// Call a cursor-paginated method, collecting `field` from every page
    async fn call_paged(
        &self,
        token: &str,
        method: &str,
        field: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, SourceError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut page_query = query.to_vec();
            if let Some(c) = &cursor {
                page_query.push(("cursor", c.clone()));
            }
            let body = self.call(token, method, &page_query).await?;
            records.extend(array_field(&body, field));

            cursor = next_cursor(&body);
            if cursor.is_none() {
                return Ok(records);
            }
        }

        tracing::warn!(method, pages = MAX_PAGES, "Slack listing truncated");
        Ok(records)
    }
}

/// Turn an `ok: false` body into an error
fn check_ok(body: Value) -> Result<Value, SourceError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    if AUTH_ERRORS.contains(&code) {
        Err(SourceError::Unauthorized(PROVIDER.to_string()))
    } else {
        Err(SourceError::Decode {
            provider: PROVIDER.to_string(),
            message: code.to_string(),
        })
    }
}

fn next_cursor(body: &Value) -> Option<String> {
    body.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Keep plain messages written by `user_id`
///
/// Join notices, bot posts and other subtyped events are not conversation.
pub fn user_messages(messages: Vec<Value>, user_id: &str) -> Vec<Value> {
    messages
        .into_iter()
        .filter(|m| m.get("subtype").is_none())
        .filter(|m| m.get("user").and_then(Value::as_str) == Some(user_id))
        .collect()
}

/// `slack_messages`, used only when Teams produced nothing
pub struct SlackMessagesSource {
    slack: SlackClient,
}

impl SlackMessagesSource {
    pub fn new(slack: SlackClient) -> Self {
        Self { slack }
    }
}

#[async_trait]
impl DataSource for SlackMessagesSource {
    fn provider(&self) -> Provider {
        Provider::Slack
    }

    fn source_type(&self) -> SourceType {
        SourceType::SlackMessages
    }

    fn fallback_for(&self) -> Option<SourceType> {
        Some(SourceType::TeamsMessages)
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let token = &credentials.access_token;

        let identity = self.slack.call(token, "auth.test", &[]).await?;
        let user_id = identity
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Decode {
                provider: PROVIDER.to_string(),
                message: "auth.test returned no user_id".to_string(),
            })?
            .to_string();

        let channels = self
            .slack
            .call_paged(
                token,
                "conversations.list",
                "channels",
                &[
                    ("types", CONVERSATION_TYPES.to_string()),
                    ("exclude_archived", "true".to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ],
            )
            .await?;

        let oldest = window.start.timestamp().to_string();
        let latest = window.end.timestamp().to_string();
        let mut messages = Vec::new();

        for channel in &channels {
            let Some(channel_id) = channel.get("id").and_then(Value::as_str) else {
                continue;
            };
            let history = self
                .slack
                .call_paged(
                    token,
                    "conversations.history",
                    "messages",
                    &[
                        ("channel", channel_id.to_string()),
                        ("oldest", oldest.clone()),
                        ("latest", latest.clone()),
                        ("limit", PAGE_LIMIT.to_string()),
                    ],
                )
                .await;

            match history {
                Ok(page) => messages.extend(user_messages(page, &user_id)),
                Err(SourceError::Unauthorized(p)) => return Err(SourceError::Unauthorized(p)),
                // not_in_channel and friends only affect that channel
                Err(e) => tracing::debug!(channel = channel_id, error = %e, "Skipping Slack channel"),
            }
        }

        Ok(RawEventBatch::new(SourceType::SlackMessages, messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_ok() {
        assert!(check_ok(json!({"ok": true, "channels": []})).is_ok());

        let err = check_ok(json!({"ok": false, "error": "invalid_auth"})).unwrap_err();
        assert!(matches!(err, SourceError::Unauthorized(p) if p == "slack"));

        let err = check_ok(json!({"ok": false, "error": "ratelimited"})).unwrap_err();
        assert!(err.to_string().contains("ratelimited"));

        assert!(check_ok(json!({})).is_err());
    }

    #[test]
    fn test_next_cursor() {
        assert_eq!(
            next_cursor(&json!({"response_metadata": {"next_cursor": "dXNlcjpVMDYx"}})).as_deref(),
            Some("dXNlcjpVMDYx")
        );
        assert_eq!(next_cursor(&json!({"response_metadata": {"next_cursor": ""}})), None);
        assert_eq!(next_cursor(&json!({"ok": true})), None);
    }

    #[test]
    fn test_user_messages() {
        let messages = vec![
            json!({"ts": "1704103200.000100", "user": "U1", "text": "morning"}),
            json!({"ts": "1704103260.000100", "user": "U2", "text": "hi"}),
            json!({"ts": "1704103300.000100", "user": "U1", "subtype": "channel_join"}),
            json!({"ts": "1704103400.000100", "bot_id": "B1", "text": "deploy done"}),
        ];
        let kept = user_messages(messages, "U1");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["text"], "morning");
    }
}
