//! Microsoft Graph fetchers: calendar, Teams chat and mail

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use std::future::Future;

use super::http::{array_field, get_json, MAX_PAGES};
use super::{Credentials, DataSource, FetchWindow, Provider};
use crate::error::SourceError;
use crate::schema::{parse_timestamp, RawEventBatch, SourceType};

const PROVIDER: &str = "microsoft";
const PAGE_SIZE: &str = "100";
/// Chats scanned for messages per run
const MAX_CHATS: usize = 50;

/// Thin Graph v1.0 client shared by the Microsoft sources
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Collect `value` across `@odata.nextLink` pages
    async fn get_paged(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, SourceError> {
        let mut records = Vec::new();
        let mut body = get_json(&self.http, PROVIDER, token, &self.url(path), query).await?;

        for _ in 0..MAX_PAGES {
            records.extend(array_field(&body, "value"));
            let Some(next) = next_link(&body) else {
                return Ok(records);
            };
            body = get_json(&self.http, PROVIDER, token, &next, &[]).await?;
        }

        tracing::warn!(path, pages = MAX_PAGES, "Graph listing truncated");
        Ok(records)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn next_link(body: &Value) -> Option<String> {
    body.get("@odata.nextLink")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn graph_time(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `calendar_events` from `/me/calendarView`
pub struct CalendarSource {
    graph: GraphClient,
}

impl CalendarSource {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl DataSource for CalendarSource {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn source_type(&self) -> SourceType {
        SourceType::CalendarEvents
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let query = [
            ("startDateTime", graph_time(window.start)),
            ("endDateTime", graph_time(window.end)),
            (
                "$select",
                "id,subject,start,end,isAllDay,attendees,organizer".to_string(),
            ),
            ("$top", PAGE_SIZE.to_string()),
        ];
        let events = self
            .graph
            .get_paged(&credentials.access_token, "/me/calendarView", &query)
            .await?;
        Ok(RawEventBatch::new(SourceType::CalendarEvents, events))
    }
}

/// `teams_messages` from the user's chats
pub struct TeamsMessagesSource {
    graph: GraphClient,
}

impl TeamsMessagesSource {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl DataSource for TeamsMessagesSource {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn source_type(&self) -> SourceType {
        SourceType::TeamsMessages
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let token = &credentials.access_token;
        let chats = self
            .graph
            .get_paged(token, "/me/chats", &[("$top", "50".to_string())])
            .await?;

        let messages = gather_chat_messages(&chats, window, |chat_id| async move {
            let path = format!("/me/chats/{chat_id}/messages");
            self.graph
                .get_paged(token, &path, &[("$top", "50".to_string())])
                .await
        })
        .await?;

        Ok(RawEventBatch::new(SourceType::TeamsMessages, messages))
    }
}

/// Windowed messages across the first [`MAX_CHATS`] chats
///
/// A chat that fails to load is skipped; an unauthorized token still fails
/// the whole source.
async fn gather_chat_messages<F, Fut>(
    chats: &[Value],
    window: FetchWindow,
    mut fetch_chat: F,
) -> Result<Vec<Value>, SourceError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, SourceError>>,
{
    let mut messages = Vec::new();
    for chat in chats.iter().take(MAX_CHATS) {
        let Some(chat_id) = chat.get("id").and_then(Value::as_str) else {
            continue;
        };
        match fetch_chat(chat_id.to_string()).await {
            Ok(page) => messages.extend(messages_in_window(page, window)),
            Err(SourceError::Unauthorized(p)) => return Err(SourceError::Unauthorized(p)),
            Err(e) => tracing::warn!(chat = chat_id, error = %e, "Skipping Teams chat"),
        }
    }
    Ok(messages)
}

/// User-authored chat messages created inside the window
///
/// System events (member added, call started) carry no `from.user` and are
/// dropped here.
pub fn messages_in_window(messages: Vec<Value>, window: FetchWindow) -> Vec<Value> {
    messages
        .into_iter()
        .filter(|m| {
            m.get("from")
                .and_then(|f| f.get("user"))
                .is_some_and(|u| !u.is_null())
        })
        .filter(|m| {
            m.get("createdDateTime")
                .and_then(parse_timestamp)
                .is_some_and(|ts| window.contains(ts))
        })
        .collect()
}

/// `emails` from `/me/messages`
pub struct EmailSource {
    graph: GraphClient,
}

impl EmailSource {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl DataSource for EmailSource {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn source_type(&self) -> SourceType {
        SourceType::Emails
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let filter = format!(
            "receivedDateTime ge {} and receivedDateTime le {}",
            graph_time(window.start),
            graph_time(window.end)
        );
        let query = [
            ("$filter", filter),
            (
                "$select",
                "id,subject,from,toRecipients,receivedDateTime,sentDateTime".to_string(),
            ),
            ("$top", PAGE_SIZE.to_string()),
        ];
        let emails = self
            .graph
            .get_paged(&credentials.access_token, "/me/messages", &query)
            .await?;
        Ok(RawEventBatch::new(SourceType::Emails, emails))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn window() -> FetchWindow {
        FetchWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_messages_in_window_filters_system_and_old() {
        let messages = vec![
            json!({"id": "1", "createdDateTime": "2024-01-05T10:00:00Z", "from": {"user": {"id": "u1"}}}),
            json!({"id": "2", "createdDateTime": "2023-12-20T10:00:00Z", "from": {"user": {"id": "u1"}}}),
            json!({"id": "3", "createdDateTime": "2024-01-05T10:00:00Z", "from": null}),
            json!({"id": "4", "createdDateTime": "2024-01-06T10:00:00Z", "from": {"user": null, "application": {}}}),
        ];
        let kept = messages_in_window(messages, window());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["id"], "1");
    }

    #[tokio::test]
    async fn test_failing_chat_is_skipped() {
        let chats = vec![json!({"id": "a"}), json!({"id": "broken"}), json!({"topic": "no id"}), json!({"id": "b"})];
        let messages = gather_chat_messages(&chats, window(), |chat_id| async move {
            if chat_id == "broken" {
                return Err(SourceError::Status {
                    provider: PROVIDER.to_string(),
                    status: 500,
                });
            }
            Ok(vec![json!({
                "id": chat_id,
                "createdDateTime": "2024-01-05T10:00:00Z",
                "from": {"user": {"id": "u1"}}
            })])
        })
        .await
        .unwrap();

        let ids: Vec<&str> = messages.iter().filter_map(|m| m["id"].as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unauthorized_chat_fails_source() {
        let chats = vec![json!({"id": "a"}), json!({"id": "b"})];
        let err = gather_chat_messages(&chats, window(), |_| async {
            Err(SourceError::Unauthorized(PROVIDER.to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Unauthorized(_)));
    }

    #[test]
    fn test_next_link() {
        let body = json!({"value": [], "@odata.nextLink": "https://graph/next?page=2"});
        assert_eq!(next_link(&body).as_deref(), Some("https://graph/next?page=2"));
        assert_eq!(next_link(&json!({"value": []})), None);
    }

    #[test]
    fn test_graph_time_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(graph_time(ts), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let graph = GraphClient::new(reqwest::Client::new(), "https://graph.example/v1.0/");
        assert_eq!(graph.url("/me/messages"), "https://graph.example/v1.0/me/messages");
    }
}
