//! Storage for issued authorization codes and access tokens.
//!
//! Only SHA-256 hashes of the opaque values are kept (`jwt::hash_token`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub subject: String,
    pub session_id: Option<String>,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub auth_time: Option<i64>,
    pub acr: Option<String>,
    /// Confirmation hash of the token binding seen at the authorization endpoint.
    pub token_binding_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_hash: String,
    pub client_id: String,
    pub subject: String,
    pub session_id: Option<String>,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Confirmation object, e.g. `{"token_binding_hash": "..."}`.
    pub cnf: Option<Map<String, Value>>,
    pub revoked: bool,
}

impl TokenRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn store_authorization_code(&self, code: AuthorizationCode) -> Result<()>;

    /// Atomically find and consume an authorization code.
    /// Returns None if the code doesn't exist, is expired, or was already used.
    async fn consume_authorization_code(&self, code_hash: &str) -> Result<Option<AuthorizationCode>>;

    async fn store_token(&self, record: TokenRecord) -> Result<()>;

    /// Looks up a token whether or not it is still active.
    async fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>>;

    /// Returns false when no such token exists.
    async fn revoke_token(&self, token_hash: &str, client_id: Option<&str>) -> Result<bool>;

    /// Drop expired codes and tokens. Returns how many entries were removed.
    async fn cleanup_expired(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn store_authorization_code(&self, code: AuthorizationCode) -> Result<()> {
        self.codes.write().await.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn consume_authorization_code(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        let mut codes = self.codes.write().await;
        let Some(code) = codes.get_mut(code_hash) else {
            return Ok(None);
        };
        if code.used || code.expires_at <= Utc::now() {
            return Ok(None);
        }
        code.used = true;
        Ok(Some(code.clone()))
    }

    async fn store_token(&self, record: TokenRecord) -> Result<()> {
        self.tokens.write().await.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        Ok(self.tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke_token(&self, token_hash: &str, client_id: Option<&str>) -> Result<bool> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(record) if client_id.is_none_or(|id| id == record.client_id) => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, c| c.expires_at > now);
            removed += before - codes.len();
        }
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at > now);
        removed += before - tokens.len();
        Ok(removed)
    }
}
