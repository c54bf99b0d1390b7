//! Registered clients and client authentication.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::jwa::{ContentEncryptionAlgorithm, KeyEncryptionAlgorithm, SignatureAlgorithm};
use crate::keys::{Jwks, SymmetricKey};

pub const DEFAULT_CNF_MEMBER: &str = "token_binding_hash";

/// A registered relying party.
#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub secret: Option<SymmetricKey>,
    pub redirect_uris: Vec<String>,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub jwks: Option<Jwks>,
    pub request_uris: Vec<String>,
    pub id_token_signed_response_alg: Option<SignatureAlgorithm>,
    pub id_token_encrypted_response_alg: Option<KeyEncryptionAlgorithm>,
    pub id_token_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub request_object_signing_alg: Option<SignatureAlgorithm>,
    pub id_token_token_binding_cnf: Option<String>,
}

impl Client {
    /// Build a client from its config entry, resolving `env:` secrets.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let secret = config
            .client_secret
            .as_ref()
            .map(|value| value.resolve().map(SymmetricKey::new))
            .transpose()?;
        Ok(Self {
            client_id: config.client_id.clone(),
            secret,
            redirect_uris: config.redirect_uris.clone(),
            response_types: config.response_types.clone(),
            scopes: config.scopes.clone(),
            jwks: config.jwks.clone(),
            request_uris: config.request_uris.clone(),
            id_token_signed_response_alg: config.id_token_signed_response_alg,
            id_token_encrypted_response_alg: config.id_token_encrypted_response_alg,
            id_token_encrypted_response_enc: config.id_token_encrypted_response_enc,
            request_object_signing_alg: config.request_object_signing_alg,
            id_token_token_binding_cnf: config.id_token_token_binding_cnf.clone(),
        })
    }

    pub fn secret_bytes(&self) -> Option<&[u8]> {
        self.secret.as_ref().map(SymmetricKey::as_bytes)
    }

    pub fn allows_response_type(&self, response_type: &str) -> bool {
        let requested = sorted_words(response_type);
        self.response_types
            .iter()
            .any(|registered| sorted_words(registered) == requested)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Member of `cnf` carrying the token-binding hash.
    pub fn cnf_member(&self) -> &str {
        self.id_token_token_binding_cnf
            .as_deref()
            .unwrap_or(DEFAULT_CNF_MEMBER)
    }

    /// Constant-time secret comparison. Clients without a secret never match.
    pub fn verify_secret(&self, presented: &str) -> bool {
        match &self.secret {
            Some(secret) => secret.as_bytes().ct_eq(presented.as_bytes()).into(),
            None => false,
        }
    }
}

fn sorted_words(value: &str) -> Vec<&str> {
    let mut words: Vec<&str> = value.split_whitespace().collect();
    words.sort_unstable();
    words
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn find(&self, client_id: &str) -> Result<Option<Client>>;
}

/// Clients loaded from configuration.
#[derive(Debug, Default)]
pub struct MemoryClientStore {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClientStore {
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Self {
        Self {
            clients: RwLock::new(
                clients
                    .into_iter()
                    .map(|c| (c.client_id.clone(), c))
                    .collect(),
            ),
        }
    }

    pub fn from_config(configs: &[ClientConfig]) -> Result<Self> {
        let clients = configs
            .iter()
            .map(Client::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(clients))
    }

    pub async fn insert(&self, client: Client) {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn find(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}

/// Client credentials as presented to the token, revocation or
/// introspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Parse `client_secret_basic` credentials. Both parts are
    /// form-urlencoded before base64 (RFC 6749 §2.3.1).
    pub fn from_basic_header(header: &str) -> Option<Self> {
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;
        Some(Self {
            client_id: form_decode(id)?,
            client_secret: form_decode(secret)?,
        })
    }

    /// `client_secret_basic` takes precedence over `client_secret_post`.
    pub fn from_request(
        authorization: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Option<Self> {
        if let Some(credentials) = authorization.and_then(Self::from_basic_header) {
            return Some(credentials);
        }
        Some(Self {
            client_id: client_id?.to_string(),
            client_secret: client_secret?.to_string(),
        })
    }
}

fn form_decode(value: &str) -> Option<String> {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
}

/// Look up the client and check its secret. Unknown clients and bad secrets
/// are indistinguishable to the caller.
pub async fn authenticate(
    store: &dyn ClientStore,
    credentials: &ClientCredentials,
) -> Result<Client> {
    let client = store
        .find(&credentials.client_id)
        .await?
        .ok_or(Error::InvalidClient)?;
    if !client.verify_secret(&credentials.client_secret) {
        tracing::debug!(client_id = %credentials.client_id, "client authentication failed");
        return Err(Error::InvalidClient);
    }
    Ok(client)
}

#[cfg(test)]
pub(crate) fn test_client(client_id: &str, secret: &str) -> Client {
    Client {
        client_id: client_id.to_string(),
        secret: Some(SymmetricKey::new(secret.as_bytes().to_vec())),
        redirect_uris: vec!["https://rp.example.com/cb".to_string()],
        response_types: vec!["code".to_string(), "id_token token".to_string()],
        scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
        jwks: None,
        request_uris: vec![],
        id_token_signed_response_alg: None,
        id_token_encrypted_response_alg: None,
        id_token_encrypted_response_enc: None,
        request_object_signing_alg: None,
        id_token_token_binding_cnf: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    #[test]
    fn basic_header_parsing() {
        let header = format!("Basic {}", STANDARD.encode("my%20client:s3cr%3At"));
        let creds = ClientCredentials::from_basic_header(&header).unwrap();
        assert_eq!(creds.client_id, "my client");
        assert_eq!(creds.client_secret, "s3cr:t");

        assert!(ClientCredentials::from_basic_header("Bearer abc").is_none());
        assert!(ClientCredentials::from_basic_header("Basic !!!").is_none());
        let no_colon = format!("Basic {}", STANDARD.encode("nocolon"));
        assert!(ClientCredentials::from_basic_header(&no_colon).is_none());
    }

    #[test]
    fn basic_wins_over_post() {
        let header = format!("Basic {}", STANDARD.encode("a:b"));
        let creds = ClientCredentials::from_request(Some(&header), Some("c"), Some("d")).unwrap();
        assert_eq!(creds.client_id, "a");
        let creds = ClientCredentials::from_request(None, Some("c"), Some("d")).unwrap();
        assert_eq!(creds.client_id, "c");
        assert!(ClientCredentials::from_request(None, Some("c"), None).is_none());
    }

    #[tokio::test]
    async fn authenticate_checks_secret() {
        let store = MemoryClientStore::new([test_client("rp", "secret")]);
        let good = ClientCredentials {
            client_id: "rp".into(),
            client_secret: "secret".into(),
        };
        assert_eq!(authenticate(&store, &good).await.unwrap().client_id, "rp");

        let bad = ClientCredentials {
            client_secret: "wrong".into(),
            ..good.clone()
        };
        assert!(matches!(authenticate(&store, &bad).await, Err(Error::InvalidClient)));

        let unknown = ClientCredentials {
            client_id: "nobody".into(),
            ..good
        };
        assert!(matches!(authenticate(&store, &unknown).await, Err(Error::InvalidClient)));
    }

    #[test]
    fn response_type_order_is_irrelevant() {
        let client = test_client("rp", "s");
        assert!(client.allows_response_type("code"));
        assert!(client.allows_response_type("token id_token"));
        assert!(!client.allows_response_type("token"));
    }

    #[test]
    fn cnf_member_defaults() {
        let mut client = test_client("rp", "s");
        assert_eq!(client.cnf_member(), "token_binding_hash");
        client.id_token_token_binding_cnf = Some("tbh".into());
        assert_eq!(client.cnf_member(), "tbh");
    }

    #[test]
    fn client_without_secret_never_authenticates() {
        let mut client = test_client("rp", "s");
        client.secret = None;
        assert!(!client.verify_secret(""));
    }

    #[test]
    fn from_config_resolves_env_secret() {
        // SAFETY: test-only env var with a unique name
        unsafe { std::env::set_var("WARDEN_TEST_CLIENT_SECRET", "from-env") };
        let config: ClientConfig = toml::from_str(
            r#"
            client_id = "rp"
            client_secret = "env:WARDEN_TEST_CLIENT_SECRET"
            redirect_uris = ["https://rp.example.com/cb"]
            "#,
        )
        .unwrap();
        assert!(matches!(config.client_secret, Some(ConfigValue::Literal(_))));
        let client = Client::from_config(&config).unwrap();
        assert!(client.verify_secret("from-env"));
        assert_eq!(client.response_types, vec!["code"]);
    }
}
