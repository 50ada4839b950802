//! Jira Cloud fetchers: assigned issues and the user's own worklogs
//!
//! Issues are flattened on the way in so the validator sees `status` as a
//! plain name instead of the nested `fields.status.name` object.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{array_field, get_json, MAX_PAGES};
use super::{Credentials, DataSource, FetchWindow, Provider};
use crate::error::SourceError;
use crate::schema::{parse_timestamp, RawEventBatch, SourceType};

const PROVIDER: &str = "jira";
const PAGE_SIZE: u64 = 100;
const ISSUE_FIELDS: &str = "summary,status,created,resolutiondate,duedate,assignee";
/// Credential metadata key holding the Atlassian cloud id
pub const CLOUD_ID_KEY: &str = "cloud_id";
const ATLASSIAN_GATEWAY: &str = "https://api.atlassian.com/ex/jira";

#[derive(Debug, Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl JiraClient {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Site root for these credentials
    ///
    /// OAuth tokens carry a cloud id and go through the Atlassian gateway;
    /// otherwise the configured site is used.
    fn site(&self, credentials: &Credentials) -> Result<String, SourceError> {
        if let Some(cloud_id) = credentials.metadata(CLOUD_ID_KEY) {
            return Ok(format!("{ATLASSIAN_GATEWAY}/{cloud_id}"));
        }
        self.base_url
            .clone()
            .ok_or_else(|| SourceError::NotConfigured("jira site".to_string()))
    }

    async fn get(
        &self,
        credentials: &Credentials,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.site(credentials)?, path);
        get_json(&self.http, PROVIDER, &credentials.access_token, &url, query).await
    }

    async fn account_id(&self, credentials: &Credentials) -> Result<String, SourceError> {
        let me = self.get(credentials, "/rest/api/3/myself", &[]).await?;
        me.get("accountId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::Decode {
                provider: PROVIDER.to_string(),
                message: "myself returned no accountId".to_string(),
            })
    }

    /// Run a JQL search, following `startAt` pages
    async fn search(
        &self,
        credentials: &Credentials,
        jql: &str,
        fields: &str,
    ) -> Result<Vec<Value>, SourceError> {
        let mut issues = Vec::new();
        let mut start_at = 0u64;

        for _ in 0..MAX_PAGES {
            let body = self
                .get(
                    credentials,
                    "/rest/api/3/search",
                    &[
                        ("jql", jql.to_string()),
                        ("fields", fields.to_string()),
                        ("startAt", start_at.to_string()),
                        ("maxResults", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let page = array_field(&body, "issues");
            let fetched = page.len() as u64;
            issues.extend(page);

            let total = body.get("total").and_then(Value::as_u64).unwrap_or(0);
            start_at += fetched;
            if fetched == 0 || start_at >= total {
                return Ok(issues);
            }
        }

        tracing::warn!(jql, pages = MAX_PAGES, "Jira search truncated");
        Ok(issues)
    }
}

fn jql_date(window: &FetchWindow) -> String {
    window.start.format("%Y-%m-%d").to_string()
}

/// Flatten a search hit into the record shape the validator reads
pub fn flatten_jira_issue(issue: &Value) -> Value {
    let fields = issue.get("fields").cloned().unwrap_or(Value::Null);
    json!({
        "id": issue.get("id"),
        "key": issue.get("key"),
        "summary": fields.get("summary"),
        "status": fields.get("status").and_then(|s| s.get("name")),
        "created": fields.get("created"),
        "resolutiondate": fields.get("resolutiondate"),
        "duedate": fields.get("duedate"),
        "assignee": fields.get("assignee").and_then(|a| a.get("accountId")),
    })
}

/// Worklogs from one issue's `/worklog` listing authored by `account_id`
/// and started inside the window
pub fn flatten_jira_worklogs(
    issue_key: &str,
    body: &Value,
    account_id: &str,
    window: &FetchWindow,
) -> Vec<Value> {
    array_field(body, "worklogs")
        .iter()
        .filter(|w| {
            w.get("author")
                .and_then(|a| a.get("accountId"))
                .and_then(Value::as_str)
                == Some(account_id)
        })
        .filter(|w| {
            w.get("started")
                .and_then(parse_timestamp)
                .is_some_and(|ts| window.contains(ts))
        })
        .map(|w| {
            json!({
                "id": w.get("id"),
                "issue_key": issue_key,
                "started": w.get("started"),
                "time_spent_seconds": w.get("timeSpentSeconds"),
                "author": account_id,
            })
        })
        .collect()
}

/// `jira_tasks`: issues assigned to the user and touched in the window
pub struct JiraTasksSource {
    jira: JiraClient,
}

impl JiraTasksSource {
    pub fn new(jira: JiraClient) -> Self {
        Self { jira }
    }
}

#[async_trait]
impl DataSource for JiraTasksSource {
    fn provider(&self) -> Provider {
        Provider::Jira
    }

    fn source_type(&self) -> SourceType {
        SourceType::JiraTasks
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let jql = format!(
            "assignee = currentUser() AND updated >= \"{}\" ORDER BY updated DESC",
            jql_date(&window)
        );
        let issues = self.jira.search(credentials, &jql, ISSUE_FIELDS).await?;
        let records = issues.iter().map(flatten_jira_issue).collect();
        Ok(RawEventBatch::new(SourceType::JiraTasks, records))
    }
}

/// `jira_worklogs`: time the user logged in the window
pub struct JiraWorklogsSource {
    jira: JiraClient,
}

impl JiraWorklogsSource {
    pub fn new(jira: JiraClient) -> Self {
        Self { jira }
    }
}

#[async_trait]
impl DataSource for JiraWorklogsSource {
    fn provider(&self) -> Provider {
        Provider::Jira
    }

    fn source_type(&self) -> SourceType {
        SourceType::JiraWorklogs
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError> {
        let account_id = self.jira.account_id(credentials).await?;
        let jql = format!(
            "worklogAuthor = currentUser() AND worklogDate >= \"{}\"",
            jql_date(&window)
        );
        let issues = self.jira.search(credentials, &jql, "summary").await?;

        let started_after = window.start.timestamp_millis().to_string();
        let mut worklogs = Vec::new();
        for issue in &issues {
            let Some(key) = issue.get("key").and_then(Value::as_str) else {
                continue;
            };
            let body = self
                .jira
                .get(
                    credentials,
                    &format!("/rest/api/3/issue/{key}/worklog"),
                    &[("startedAfter", started_after.clone())],
                )
                .await?;
            worklogs.extend(flatten_jira_worklogs(key, &body, &account_id, &window));
        }

        Ok(RawEventBatch::new(SourceType::JiraWorklogs, worklogs))
    }
}
