//! Provider token storage
//!
//! Tokens are obtained elsewhere (OAuth is not performed here) and handed to
//! a [`TokenStore`]. [`StoredTokenProvider`] adapts any store to the
//! [`TokenProvider`] the fetchers consume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{SourceError, StorageError};
use crate::sources::{Credentials, Provider, TokenProvider};

/// One user's token for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider extras such as the Jira cloud id
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub stored_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(
        user_id: impl Into<String>,
        provider: Provider,
        access_token: impl Into<String>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            access_token: access_token.into(),
            expires_at: None,
            metadata: BTreeMap::new(),
            stored_at,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.access_token.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn matches(&self, user_id: &str, provider: Provider) -> bool {
        self.user_id == user_id && self.provider == provider
    }
}

/// Token persistence backend
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, user_id: &str, provider: Provider)
        -> Result<Option<StoredToken>, StorageError>;

    /// Insert or replace the token for the token's user and provider
    async fn put(&self, token: StoredToken) -> Result<(), StorageError>;

    /// Returns whether a token was removed
    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, StorageError>;

    async fn list(&self, user_id: &str) -> Result<Vec<StoredToken>, StorageError>;
}

/// Process-local store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<BTreeMap<(String, Provider), StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<StoredToken>, StorageError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(&(user_id.to_string(), provider)).cloned())
    }

    async fn put(&self, token: StoredToken) -> Result<(), StorageError> {
        let key = (token.user_id.clone(), token.provider);
        self.tokens.write().await.insert(key, token);
        Ok(())
    }

    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, StorageError> {
        let mut tokens = self.tokens.write().await;
        Ok(tokens.remove(&(user_id.to_string(), provider)).is_some())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<StoredToken>, StorageError> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<StoredToken>,
}

/// JSON file store for single-machine use
///
/// Every call re-reads the file so concurrent CLI invocations see each
/// other's writes. Writes go through a temporary file and a rename.
#[derive(Debug)]
pub struct LocalFileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<TokenFile, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(TokenFile::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TokenFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, file: &TokenFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), tokens = file.tokens.len(), "Token file saved");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for LocalFileTokenStore {
    async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<StoredToken>, StorageError> {
        let file = self.load().await?;
        Ok(file.tokens.into_iter().find(|t| t.matches(user_id, provider)))
    }

    async fn put(&self, token: StoredToken) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        file.tokens
            .retain(|t| !t.matches(&token.user_id, token.provider));
        info!(user_id = %token.user_id, provider = %token.provider, "Token stored");
        file.tokens.push(token);
        self.save(&file).await
    }

    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        let before = file.tokens.len();
        file.tokens.retain(|t| !t.matches(user_id, provider));
        if file.tokens.len() == before {
            return Ok(false);
        }
        self.save(&file).await?;
        Ok(true)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<StoredToken>, StorageError> {
        let file = self.load().await?;
        Ok(file
            .tokens
            .into_iter()
            .filter(|t| t.user_id == user_id)
            .collect())
    }
}

/// [`TokenProvider`] backed by a [`TokenStore`]
///
/// A missing token is [`SourceError::MissingToken`]; an expired one is
/// [`SourceError::Unauthorized`], the same as a provider 401.
pub struct StoredTokenProvider {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl StoredTokenProvider {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn credentials(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Credentials, SourceError> {
        let token = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or_else(|| SourceError::MissingToken(provider.to_string()))?;

        if token.is_expired(self.clock.now()) {
            return Err(SourceError::Unauthorized(provider.to_string()));
        }
        Ok(token.credentials())
    }
}
