//! Token introspection (RFC 7662).
//!
//! Introspection never fails: anything other than an active token presented
//! by an authorized caller is answered with `{"active": false}`.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::clients::{self, ClientCredentials, ClientStore};
use crate::error::Result;
use crate::issuance::TokenIssuer;
use crate::jwt;
use crate::store::TokenRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Map<String, Value>>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }

    fn active(record: TokenRecord, issuer: &str) -> Self {
        Self {
            active: true,
            scope: (!record.scopes.is_empty()).then(|| record.scopes.join(" ")),
            client_id: Some(record.client_id.clone()),
            token_type: Some("Bearer"),
            exp: Some(record.expires_at.timestamp()),
            iat: Some(record.issued_at.timestamp()),
            sub: Some(record.subject),
            aud: Some(record.client_id),
            iss: Some(issuer.to_string()),
            cnf: record.cnf,
        }
    }
}

pub struct Introspector<'a> {
    pub issuer: &'a TokenIssuer,
    pub clients: &'a dyn ClientStore,
}

impl Introspector<'_> {
    pub async fn introspect(&self, token: &str, authorization: Option<&str>) -> IntrospectionResponse {
        match self.try_introspect(token, authorization).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "introspection failed; reporting inactive");
                IntrospectionResponse::inactive()
            }
        }
    }

    async fn try_introspect(&self, token: &str, authorization: Option<&str>) -> Result<IntrospectionResponse> {
        if !self.caller_authorized(authorization).await? {
            tracing::debug!("introspection caller not authorized");
            return Ok(IntrospectionResponse::inactive());
        }
        if token.is_empty() {
            return Ok(IntrospectionResponse::inactive());
        }
        let record = self
            .issuer
            .store()
            .find_token(&jwt::hash_token(token))
            .await?;
        Ok(match record {
            Some(record) if record.is_active(Utc::now()) => {
                IntrospectionResponse::active(record, &self.issuer.config().issuer)
            }
            _ => IntrospectionResponse::inactive(),
        })
    }

    /// `Basic` credentials of a registered client, or a `Bearer` active
    /// access token.
    async fn caller_authorized(&self, authorization: Option<&str>) -> Result<bool> {
        let Some(header) = authorization.map(str::trim) else {
            return Ok(false);
        };
        if let Some(credentials) = ClientCredentials::from_basic_header(header) {
            return Ok(clients::authenticate(self.clients, &credentials).await.is_ok());
        }
        let Some((scheme, bearer)) = header.split_once(' ') else {
            return Ok(false);
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Ok(false);
        }
        let record = self
            .issuer
            .store()
            .find_token(&jwt::hash_token(bearer.trim()))
            .await?;
        Ok(record.is_some_and(|r| r.is_active(Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::{Engine, engine::general_purpose::STANDARD};

    use super::*;
    use crate::clients::{MemoryClientStore, test_client};
    use crate::config::IssuerConfig;
    use crate::store::MemoryStore;
    use crate::test_support::{self, CLIENT_SECRET, ISSUER};

    fn setup() -> (TokenIssuer, MemoryClientStore) {
        let issuer = TokenIssuer::new(
            Arc::new(test_support::registry()),
            Arc::new(MemoryStore::new()),
            IssuerConfig::new(ISSUER),
        );
        (issuer, MemoryClientStore::new([test_client("rp", CLIENT_SECRET)]))
    }

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    #[tokio::test]
    async fn active_token_with_basic_auth() {
        let (issuer, clients) = setup();
        let client = test_client("rp", CLIENT_SECRET);
        let scopes = vec!["openid".to_string(), "email".to_string()];
        let issued = issuer
            .issue_access_token(&client, "alice", Some("sid"), &scopes, Some("tb-hash"))
            .await
            .unwrap();

        let introspector = Introspector { issuer: &issuer, clients: &clients };
        let response = introspector
            .introspect(&issued.token, Some(&basic("rp", CLIENT_SECRET)))
            .await;
        assert!(response.active);
        assert_eq!(response.scope.as_deref(), Some("openid email"));
        assert_eq!(response.sub.as_deref(), Some("alice"));
        assert_eq!(response.iss.as_deref(), Some(ISSUER));
        assert_eq!(response.cnf.unwrap()["token_binding_hash"], "tb-hash");
    }

    #[tokio::test]
    async fn bearer_caller_must_hold_active_token() {
        let (issuer, clients) = setup();
        let client = test_client("rp", CLIENT_SECRET);
        let caller = issuer.issue_access_token(&client, "svc", None, &[], None).await.unwrap();
        let subject = issuer.issue_access_token(&client, "alice", None, &[], None).await.unwrap();
        let introspector = Introspector { issuer: &issuer, clients: &clients };

        let bearer = format!("Bearer {}", caller.token);
        assert!(introspector.introspect(&subject.token, Some(&bearer)).await.active);

        issuer.revoke(&client, &caller.token).await.unwrap();
        assert!(!introspector.introspect(&subject.token, Some(&bearer)).await.active);
    }

    #[tokio::test]
    async fn inactive_cases_never_fail() {
        let (issuer, clients) = setup();
        let client = test_client("rp", CLIENT_SECRET);
        let issued = issuer.issue_access_token(&client, "alice", None, &[], None).await.unwrap();
        let introspector = Introspector { issuer: &issuer, clients: &clients };
        let auth = basic("rp", CLIENT_SECRET);

        let inactive = IntrospectionResponse::inactive();
        assert_eq!(introspector.introspect("unknown", Some(&auth)).await, inactive);
        assert_eq!(introspector.introspect("", Some(&auth)).await, inactive);
        assert_eq!(introspector.introspect(&issued.token, None).await, inactive);
        assert_eq!(introspector.introspect(&issued.token, Some("garbage")).await, inactive);
        assert_eq!(introspector.introspect(&issued.token, Some("Bearer nope")).await, inactive);
        assert_eq!(introspector.introspect(&issued.token, Some(&basic("rp", "wrong"))).await, inactive);

        issuer.revoke(&client, &issued.token).await.unwrap();
        assert_eq!(introspector.introspect(&issued.token, Some(&auth)).await, inactive);
    }

    #[tokio::test]
    async fn expired_token_is_inactive() {
        let registry = Arc::new(test_support::registry());
        let issuer = TokenIssuer::new(
            registry,
            Arc::new(MemoryStore::new()),
            IssuerConfig {
                access_token_ttl_secs: 0,
                ..IssuerConfig::new(ISSUER)
            },
        );
        let clients = MemoryClientStore::new([test_client("rp", CLIENT_SECRET)]);
        let client = test_client("rp", CLIENT_SECRET);
        let issued = issuer.issue_access_token(&client, "alice", None, &[], None).await.unwrap();
        let introspector = Introspector { issuer: &issuer, clients: &clients };
        let response = introspector
            .introspect(&issued.token, Some(&basic("rp", CLIENT_SECRET)))
            .await;
        assert!(!response.active);
        assert_eq!(serde_json::to_value(&response).unwrap(), serde_json::json!({"active": false}));
    }
}
