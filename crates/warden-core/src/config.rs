use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::jwa::{ContentEncryptionAlgorithm, KeyEncryptionAlgorithm, SignatureAlgorithm};
use crate::keys::Jwks;
use crate::redirect::{PatternList, RedirectPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub issuer: IssuerConfig,
    pub keystore: KeyStoreConfig,
    #[serde(default)]
    pub request_object: RequestObjectConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Public base URL for this service; endpoint URLs in the discovery
    /// document are built from it.
    pub public_url: String,
    #[serde(default)]
    pub behind_proxy: bool,
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,
}

fn default_cookie_prefix() -> String {
    "warden".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuerConfig {
    /// `iss` of every ID token.
    pub issuer: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_id_token_ttl")]
    pub id_token_ttl_secs: u64,
    #[serde(default = "default_authz_code_ttl")]
    pub authorization_code_ttl_secs: u64,
    /// Never accept `alg: none` on inbound request objects.
    #[serde(default = "default_true")]
    pub reject_none_alg: bool,
    /// Allow clients registered with `id_token_signed_response_alg = "none"`.
    #[serde(default)]
    pub allow_unsigned_id_tokens: bool,
    /// `cnf` members a client may choose for token-binding confirmation.
    #[serde(default = "default_cnf_values")]
    pub token_binding_cnf_values_supported: Vec<String>,
}

impl IssuerConfig {
    /// Defaults for everything but the issuer identifier.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            access_token_ttl_secs: default_access_ttl(),
            id_token_ttl_secs: default_id_token_ttl(),
            authorization_code_ttl_secs: default_authz_code_ttl(),
            reject_none_alg: true,
            allow_unsigned_id_tokens: false,
            token_binding_cnf_values_supported: default_cnf_values(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreConfig {
    pub path: PathBuf,
    pub secret: ConfigValue,
    /// Distinguished name the keystore must have been issued for.
    pub dn_name: Option<String>,
    /// RSA key used for request objects whose `kid` names no keystore entry.
    pub static_decryption_kid: Option<String>,
    pub session_kid: Option<String>,
    /// Signature algorithm name to kid.
    #[serde(default)]
    pub default_kids: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestObjectConfig {
    #[serde(default)]
    pub require_encryption: bool,
    /// Require `exp` and `nbf`, both within 60 minutes of now.
    #[serde(default)]
    pub strict_lifetime: bool,
    /// Check a `request_uri` fragment against the SHA-256 of the fetched body.
    #[serde(default)]
    pub request_uri_hash_verification: bool,
    #[serde(default)]
    pub request_uri_block_list: Vec<String>,
}

/// URL patterns applied to every registered redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectConfig {
    #[serde(default)]
    pub client_white_list: Vec<String>,
    #[serde(default)]
    pub client_black_list: Vec<String>,
}

/// Static client registration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: Option<ConfigValue>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default = "default_client_scopes")]
    pub scopes: Vec<String>,
    pub jwks: Option<Jwks>,
    #[serde(default)]
    pub request_uris: Vec<String>,
    pub id_token_signed_response_alg: Option<SignatureAlgorithm>,
    pub id_token_encrypted_response_alg: Option<KeyEncryptionAlgorithm>,
    pub id_token_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub request_object_signing_alg: Option<SignatureAlgorithm>,
    pub id_token_token_binding_cnf: Option<String>,
}

/// Validate that a scope name uses only safe characters.
/// Allowed: lowercase ASCII letters, digits, colons, dots, underscores, hyphens.
/// Must start with a letter and be non-empty.
pub fn validate_scope_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("scope name cannot be empty".to_string()));
    }
    let first = name.as_bytes()[0];
    if !first.is_ascii_lowercase() {
        return Err(Error::Config(format!(
            "scope name must start with a lowercase letter: {name}"
        )));
    }
    for ch in name.bytes() {
        if !matches!(ch, b'a'..=b'z' | b'0'..=b'9' | b':' | b'.' | b'_' | b'-') {
            return Err(Error::Config(format!(
                "scope name contains invalid character '{}': {name}",
                ch as char
            )));
        }
    }
    Ok(())
}

// --- ConfigValue: supports "env:VAR_NAME" syntax ---

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
}

impl ConfigValue {
    pub fn resolve(&self) -> Result<String> {
        let ConfigValue::Literal(s) = self;
        if let Some(var_name) = s.strip_prefix("env:") {
            std::env::var(var_name).map_err(|_| {
                Error::Config(format!("environment variable {var_name} not set"))
            })
        } else {
            Ok(s.clone())
        }
    }
}

// --- Config resolution ---

const CONFIG_FILENAME: &str = "warden.toml";
const CONFIG_ENV_VAR: &str = "WARDEN_CONFIG";

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.issuer.authorization_code_ttl_secs == 0 {
            return Err(Error::Config(
                "issuer.authorization_code_ttl_secs must be at least 1".to_string(),
            ));
        }
        for alg in self.keystore.default_kids.keys() {
            alg.parse::<SignatureAlgorithm>().map_err(|_| {
                Error::Config(format!("keystore.default_kids: unknown algorithm \"{alg}\""))
            })?;
        }
        let redirect_policy = RedirectPolicy::new(
            &self.redirect.client_white_list,
            &self.redirect.client_black_list,
        )?;
        PatternList::new(&self.request_object.request_uri_block_list)?;

        let mut seen = HashSet::new();
        for client in &self.clients {
            let id = &client.client_id;
            if !seen.insert(id.as_str()) {
                return Err(Error::Config(format!("duplicate client_id \"{id}\"")));
            }
            if client.redirect_uris.is_empty() {
                return Err(Error::Config(format!("client \"{id}\" has no redirect_uris")));
            }
            if !redirect_policy.permits_all(&client.redirect_uris) {
                return Err(Error::Config(format!(
                    "client \"{id}\" registers a redirect URI rejected by [redirect]"
                )));
            }
            for scope in &client.scopes {
                validate_scope_name(scope)?;
            }
            if let Some(member) = &client.id_token_token_binding_cnf {
                if !self.issuer.token_binding_cnf_values_supported.contains(member) {
                    return Err(Error::Config(format!(
                        "client \"{id}\": cnf member \"{member}\" is not in token_binding_cnf_values_supported"
                    )));
                }
            }
            if client.id_token_encrypted_response_alg.is_some()
                != client.id_token_encrypted_response_enc.is_some()
            {
                return Err(Error::Config(format!(
                    "client \"{id}\": id_token_encrypted_response_alg and _enc must be set together"
                )));
            }
            if client.id_token_signed_response_alg == Some(SignatureAlgorithm::None)
                && !self.issuer.allow_unsigned_id_tokens
            {
                return Err(Error::Config(format!(
                    "client \"{id}\" requests unsigned ID tokens but issuer.allow_unsigned_id_tokens is false"
                )));
            }
        }
        Ok(())
    }
}

/// Resolve config file location using the standard search order:
/// 1. Explicit path (CLI flag)
/// 2. WARDEN_CONFIG env var
/// 3. Current directory
/// 4. Walk up parent directories
/// 5. ~/.config/warden/config.toml
/// 6. /etc/warden/config.toml
pub fn resolve_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut searched = Vec::new();

    // 1. Explicit path, fail immediately if specified but missing
    if let Some(path) = explicit_path {
        if path.exists() {
            return Config::from_path(path);
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Config::from_path(&path);
        }
        searched.push(path);
    }

    // 3 & 4. Current directory and walk up
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(d) = dir {
            let config_path = d.join(CONFIG_FILENAME);
            if config_path.exists() {
                return Config::from_path(&config_path);
            }
            searched.push(config_path);
            dir = d.parent();
        }
    }

    // 5. User config
    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("warden").join("config.toml");
        if user_config.exists() {
            return Config::from_path(&user_config);
        }
        searched.push(user_config);
    }

    // 6. System config
    let system_config = PathBuf::from("/etc/warden/config.toml");
    if system_config.exists() {
        return Config::from_path(&system_config);
    }
    searched.push(system_config);

    Err(Error::ConfigNotFound { searched })
}

// --- Defaults ---

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8081 }
fn default_access_ttl() -> u64 { 3600 }     // 1 hour
fn default_id_token_ttl() -> u64 { 3600 }   // 1 hour
fn default_authz_code_ttl() -> u64 { 300 }  // 5 minutes
fn default_true() -> bool { true }
fn default_cnf_values() -> Vec<String> { vec!["token_binding_hash".to_string(), "tbh".to_string()] }
fn default_response_types() -> Vec<String> { vec!["code".to_string()] }
fn default_client_scopes() -> Vec<String> { vec!["openid".to_string()] }
