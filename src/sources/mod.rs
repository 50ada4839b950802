//! Provider fetchers
//!
//! Each [`DataSource`] pulls one source type for one user over a time window.
//! [`SourceRegistry::fetch_all`] fans the fetches out concurrently and turns
//! any failure into an empty batch plus a recorded [`SourceFailure`], so a
//! run never fails because one provider is down.

mod http;
mod jira;
mod microsoft;
mod slack;

pub use jira::{
    flatten_jira_issue, flatten_jira_worklogs, JiraClient, JiraTasksSource, JiraWorklogsSource,
    CLOUD_ID_KEY,
};
pub use microsoft::{
    messages_in_window, CalendarSource, EmailSource, GraphClient, TeamsMessagesSource,
};
pub use slack::{user_messages, SlackClient, SlackMessagesSource};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProvidersConfig;
use crate::error::SourceError;
use crate::schema::{RawEventBatch, RawStreamData, SourceType};

/// Upstream account a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Microsoft,
    Slack,
    Jira,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Microsoft, Provider::Slack, Provider::Jira];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Microsoft => "microsoft",
            Provider::Slack => "slack",
            Provider::Jira => "jira",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == key)
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

/// Access token plus whatever the provider attached at authorization time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Resolves a user's credentials for a provider
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn credentials(&self, user_id: &str, provider: Provider)
        -> Result<Credentials, SourceError>;
}

/// Inclusive time range fetched from every provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `now`, or `None` when the start would
    /// fall outside the representable range
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Option<Self> {
        let start = now.checked_sub_signed(Duration::days(i64::from(days)))?;
        Some(Self::new(start, now))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// One source type from one provider
#[async_trait]
pub trait DataSource: Send + Sync {
    fn provider(&self) -> Provider;

    fn source_type(&self) -> SourceType;

    /// Source this one only stands in for
    ///
    /// Fallback sources are fetched after everything else, and skipped when
    /// the source they replace already returned records.
    fn fallback_for(&self) -> Option<SourceType> {
        None
    }

    async fn fetch(
        &self,
        credentials: &Credentials,
        window: FetchWindow,
    ) -> Result<RawEventBatch, SourceError>;
}

/// A source that could not be fetched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub provider: Provider,
    pub source: SourceType,
    pub error: String,
}

/// Everything one `fetch_all` call produced
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub raw: RawStreamData,
    pub failures: Vec<SourceFailure>,
}

impl FetchOutcome {
    /// Record count per fetched source
    pub fn data_counts(&self) -> BTreeMap<String, usize> {
        self.raw
            .iter()
            .map(|(key, value)| (key.clone(), value.as_array().map_or(0, Vec::len)))
            .collect()
    }

    fn has_records(&self, source: SourceType) -> bool {
        self.raw
            .get(source)
            .and_then(Value::as_array)
            .is_some_and(|records| !records.is_empty())
    }

    fn record(&mut self, source: &dyn DataSource, result: Result<RawEventBatch, SourceError>) {
        match result {
            Ok(batch) => {
                info!(source = %batch.source, records = batch.len(), "Fetched source");
                self.raw.insert(batch);
            }
            Err(e) => self.fail(source, e.to_string()),
        }
    }

    fn fail(&mut self, source: &dyn DataSource, error: String) {
        warn!(
            provider = %source.provider(),
            source = %source.source_type(),
            error = %error,
            "Source fetch failed, continuing with an empty batch"
        );
        self.failures.push(SourceFailure {
            provider: source.provider(),
            source: source.source_type(),
            error,
        });
        self.raw.insert(RawEventBatch::empty(source.source_type()));
    }
}

/// The registered sources and the credentials they fetch with
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DataSource>>,
    tokens: Arc<dyn TokenProvider>,
}

impl SourceRegistry {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            sources: Vec::new(),
            tokens,
        }
    }

    /// Registry with every built-in Microsoft, Slack and Jira source
    pub fn from_config(
        config: &ProvidersConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SourceError> {
        let http = http::client(config.request_timeout())?;
        let graph = GraphClient::new(http.clone(), &config.microsoft_graph_url);
        let slack = SlackClient::new(http.clone(), &config.slack_api_url);
        let jira = JiraClient::new(http, config.jira_base_url.clone());

        Ok(Self::new(tokens)
            .with_source(Arc::new(CalendarSource::new(graph.clone())))
            .with_source(Arc::new(TeamsMessagesSource::new(graph.clone())))
            .with_source(Arc::new(EmailSource::new(graph)))
            .with_source(Arc::new(SlackMessagesSource::new(slack)))
            .with_source(Arc::new(JiraTasksSource::new(jira.clone())))
            .with_source(Arc::new(JiraWorklogsSource::new(jira))))
    }

    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.register(source);
        self
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        self.sources.push(source);
    }

    /// Providers with at least one registered source
    pub fn providers(&self) -> BTreeSet<Provider> {
        self.sources.iter().map(|s| s.provider()).collect()
    }

    /// Fetch every source of the requested providers for one user
    pub async fn fetch_all(
        &self,
        user_id: &str,
        providers: &[Provider],
        window: FetchWindow,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let requested: BTreeSet<Provider> = providers.iter().copied().collect();

        // One credential lookup per provider
        let mut credentials = BTreeMap::new();
        for provider in requested.intersection(&self.providers()) {
            match self.tokens.credentials(user_id, *provider).await {
                Ok(c) => {
                    credentials.insert(*provider, c);
                }
                Err(e) => {
                    let error = e.to_string();
                    for source in self.sources.iter().filter(|s| s.provider() == *provider) {
                        outcome.fail(source.as_ref(), error.clone());
                    }
                }
            }
        }

        let (primary, fallback): (Vec<_>, Vec<_>) = self
            .sources
            .iter()
            .filter_map(|s| credentials.get(&s.provider()).map(|c| (s, c)))
            .partition(|(s, _)| s.fallback_for().is_none());

        let results = join_all(
            primary
                .iter()
                .map(|(source, creds)| source.fetch(creds, window)),
        )
        .await;
        for ((source, _), result) in primary.into_iter().zip(results) {
            outcome.record(source.as_ref(), result);
        }

        for (source, creds) in fallback {
            if let Some(replaced) = source.fallback_for() {
                if outcome.has_records(replaced) {
                    debug!(
                        source = %source.source_type(),
                        replaced = %replaced,
                        "Primary source has records, skipping fallback"
                    );
                    continue;
                }
            }
            let result = source.fetch(creds, window).await;
            outcome.record(source.as_ref(), result);
        }

        outcome
    }
}
