//! Shared test infrastructure for warden-api integration tests.
//!
//! Every test boots its own server on `127.0.0.1:0` with fresh in-memory
//! stores. Keys are generated once per test binary since RSA generation is
//! slow.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

pub use reqwest::{Client, StatusCode};
pub use serde_json;
pub use url;

use warden_api::routes;
use warden_api::server::AppState;
use warden_core::clients::MemoryClientStore;
use warden_core::config::Config;
use warden_core::jwa::{Curve, KeyEncryptionAlgorithm, SignatureAlgorithm};
use warden_core::keys::{KeyAlgorithm, KeyEntry, KeyRegistry, KeyStore, PrivateKey};
use warden_core::request_object::RequestUriFetcher;
use warden_core::session::{self, EndUser};
use warden_core::store::MemoryStore;

pub const ISSUER: &str = "https://auth.example.com";
pub const CLIENT_ID: &str = "rp";
pub const CLIENT_SECRET: &str = "integration-secret-0123456789abcdef0123456789abcdef";
pub const REDIRECT_URI: &str = "https://rp.example.com/cb";
pub const REQUEST_URI: &str = "https://rp.example.com/request.jwt";

const CONFIG: &str = r#"
[server]
public_url = "http://localhost:3000"

[issuer]
issuer = "https://auth.example.com"

[keystore]
path = "keystore.json"
secret = "unused"

[redirect]
client_black_list = ["*.evil.example"]

[[clients]]
client_id = "rp"
client_secret = "integration-secret-0123456789abcdef0123456789abcdef"
redirect_uris = ["https://rp.example.com/cb"]
response_types = ["code", "code id_token", "id_token token"]
scopes = ["openid", "profile", "email"]
request_uris = ["https://rp.example.com/request.jwt"]
"#;

static REGISTRY: OnceLock<Arc<KeyRegistry>> = OnceLock::new();

/// RS256 session/signing key, ES256 key and an RSA-OAEP decryption key.
pub fn registry() -> Arc<KeyRegistry> {
    REGISTRY
        .get_or_init(|| {
            let rsa = PrivateKey::generate_rsa(2048).expect("RSA key generation");
            let oaep = PrivateKey::generate_rsa(2048).expect("RSA key generation");
            let entries = vec![
                KeyEntry::new("rs256-1", KeyAlgorithm::Signature(SignatureAlgorithm::Rs256), rsa).unwrap(),
                KeyEntry::new(
                    "es256-1",
                    KeyAlgorithm::Signature(SignatureAlgorithm::Es256),
                    PrivateKey::generate_ec(Curve::P256),
                )
                .unwrap(),
                KeyEntry::new(
                    "rsa-oaep-1",
                    KeyAlgorithm::KeyEncryption(KeyEncryptionAlgorithm::RsaOaep),
                    oaep,
                )
                .unwrap(),
            ];
            let store = KeyStore::from_entries(None, entries).unwrap();
            Arc::new(KeyRegistry::new(store))
        })
        .clone()
}

/// Serves request objects by URI from memory.
#[derive(Default)]
pub struct MapFetcher(RwLock<HashMap<String, String>>);

impl MapFetcher {
    pub async fn put(&self, uri: &str, body: String) {
        self.0.write().await.insert(uri.to_string(), body);
    }
}

#[async_trait]
impl RequestUriFetcher for MapFetcher {
    async fn fetch(&self, uri: &url::Url) -> warden_core::Result<String> {
        let mut uri = uri.clone();
        uri.set_fragment(None);
        self.0
            .read()
            .await
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| warden_core::Error::InvalidRequestUri("not found".to_string()))
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<KeyRegistry>,
    pub fetcher: Arc<MapFetcher>,
    pub config: Arc<Config>,
    pub _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = Config::from_path(&path).expect("test config is valid");

        let registry = registry();
        let fetcher = Arc::new(MapFetcher::default());
        let clients = MemoryClientStore::from_config(&config.clients).unwrap();
        let state = AppState::with_parts(
            config,
            registry.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(clients),
            fetcher.clone(),
        )
        .unwrap();
        let config = state.config.clone();

        let app = axum::Router::new()
            .merge(routes::router())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            registry,
            fetcher,
            config,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Redirects are returned, not followed.
    pub fn client(&self) -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// `Cookie` header value carrying a fresh session for `subject`.
    pub fn session_cookie(&self, subject: &str) -> String {
        let user = EndUser {
            subject: subject.to_string(),
            session_id: format!("sid-{subject}"),
            auth_time: chrono::Utc::now().timestamp() - 5,
            acr: None,
        };
        let token = session::sign_session(&self.registry, ISSUER, &user, 600).unwrap();
        format!("warden_session={token}")
    }

    /// Run `/authorize` with `params` as `subject` and return the redirect URL.
    pub async fn authorize(&self, subject: &str, params: &[(&str, &str)]) -> url::Url {
        let resp = self
            .client()
            .get(self.url("/authorize"))
            .query(params)
            .header("cookie", self.session_cookie(subject))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND, "authorize did not redirect");
        let location = resp.headers()["location"].to_str().unwrap();
        url::Url::parse(location).unwrap()
    }
}

pub fn query_params(url: &url::Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub fn fragment_params(url: &url::Url) -> HashMap<String, String> {
    url::form_urlencoded::parse(url.fragment().unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}
