//! Minting authorization codes, access tokens and ID tokens, and the
//! `authorization_code` exchange.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::clients::Client;
use crate::config::IssuerConfig;
use crate::error::{Error, Result};
use crate::jwa::{AlgorithmFamily, ContentEncryptionAlgorithm, SignatureAlgorithm};
use crate::jwe::{self, JweKey};
use crate::jws::{self, SigningKey};
use crate::jwt;
use crate::keys::KeyRegistry;
use crate::session::EndUser;
use crate::store::{AuthorizationCode, TokenRecord, TokenStore};

/// OIDC Core §3.1.3.7: A128CBC-HS256 when only the `alg` is registered.
const DEFAULT_ID_TOKEN_ENC: ContentEncryptionAlgorithm = ContentEncryptionAlgorithm::A128CbcHs256;

/// Everything decided at the authorization endpoint that issued tokens
/// must carry.
#[derive(Debug, Clone, Default)]
pub struct Grant {
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub acr: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub token_binding_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_in: u64,
}

/// Inputs of one ID token.
#[derive(Debug, Clone, Default)]
pub struct IdTokenParams<'a> {
    pub subject: &'a str,
    pub session_id: Option<&'a str>,
    pub auth_time: Option<i64>,
    pub nonce: Option<&'a str>,
    pub acr: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub code: Option<&'a str>,
    pub token_binding_hash: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Left half of the digest of `value` under the ID token's hash (OIDC Core
/// §3.1.3.6).
pub fn half_hash(alg: SignatureAlgorithm, value: &str) -> String {
    let digest = alg.hash().digest(value.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

fn cnf_claim(member: &str, hash: &str) -> Map<String, Value> {
    let mut cnf = Map::new();
    cnf.insert(member.to_string(), Value::String(hash.to_string()));
    cnf
}

pub struct TokenIssuer {
    registry: Arc<KeyRegistry>,
    store: Arc<dyn TokenStore>,
    config: IssuerConfig,
}

impl TokenIssuer {
    pub fn new(registry: Arc<KeyRegistry>, store: Arc<dyn TokenStore>, config: IssuerConfig) -> Self {
        Self { registry, store, config }
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Mint a one-time authorization code for `grant`.
    pub async fn issue_code(&self, client: &Client, user: &EndUser, grant: &Grant) -> Result<String> {
        let (code, code_hash) = jwt::generate_opaque_token();
        let expires_at = Utc::now() + Duration::seconds(self.config.authorization_code_ttl_secs as i64);
        self.store
            .store_authorization_code(AuthorizationCode {
                code_hash,
                client_id: client.client_id.clone(),
                redirect_uri: grant.redirect_uri.clone(),
                subject: user.subject.clone(),
                session_id: Some(user.session_id.clone()),
                scopes: grant.scopes.clone(),
                nonce: grant.nonce.clone(),
                code_challenge: grant.code_challenge.clone(),
                code_challenge_method: grant.code_challenge_method.clone(),
                auth_time: Some(user.auth_time),
                acr: grant.acr.clone(),
                token_binding_hash: grant.token_binding_hash.clone(),
                expires_at,
                used: false,
            })
            .await?;
        tracing::debug!(client_id = %client.client_id, sub = %user.subject, "authorization code issued");
        Ok(code)
    }

    pub async fn issue_access_token(
        &self,
        client: &Client,
        subject: &str,
        session_id: Option<&str>,
        scopes: &[String],
        token_binding_hash: Option<&str>,
    ) -> Result<IssuedAccessToken> {
        let (token, token_hash) = jwt::generate_opaque_token();
        let now = Utc::now();
        let ttl = self.config.access_token_ttl_secs;
        self.store
            .store_token(TokenRecord {
                token_hash,
                client_id: client.client_id.clone(),
                subject: subject.to_string(),
                session_id: session_id.map(str::to_string),
                scopes: scopes.to_vec(),
                issued_at: now,
                expires_at: now + Duration::seconds(ttl as i64),
                cnf: token_binding_hash.map(|hash| cnf_claim(client.cnf_member(), hash)),
                revoked: false,
            })
            .await?;
        tracing::debug!(client_id = %client.client_id, sub = %subject, "access token issued");
        Ok(IssuedAccessToken { token, expires_in: ttl })
    }

    /// Sign an ID token with the client's registered algorithm and, when the
    /// client registered one, encrypt it.
    pub fn issue_id_token(&self, client: &Client, params: &IdTokenParams<'_>) -> Result<String> {
        let alg = client
            .id_token_signed_response_alg
            .unwrap_or(SignatureAlgorithm::Rs256);
        let now = Utc::now();
        let claims = IdTokenClaims {
            iss: self.config.issuer.clone(),
            sub: params.subject.to_string(),
            aud: client.client_id.clone(),
            exp: (now + Duration::seconds(self.config.id_token_ttl_secs as i64)).timestamp(),
            iat: now.timestamp(),
            auth_time: params.auth_time,
            nonce: params.nonce.map(str::to_string),
            sid: params.session_id.map(str::to_string),
            acr: params.acr.map(str::to_string),
            at_hash: params.access_token.map(|t| half_hash(alg, t)),
            c_hash: params.code.map(|c| half_hash(alg, c)),
            cnf: params
                .token_binding_hash
                .map(|hash| cnf_claim(client.cnf_member(), hash)),
        };

        let signed = match alg.family() {
            AlgorithmFamily::None => {
                if !self.config.allow_unsigned_id_tokens {
                    return Err(Error::UnsupportedAlgorithm("unsigned ID tokens are disabled".to_string()));
                }
                jws::sign_token(&claims, alg, SigningKey::Unsigned, None)?
            }
            AlgorithmFamily::Hmac => {
                let secret = client
                    .secret_bytes()
                    .ok_or_else(|| Error::KeyResolution(format!("{alg} requires a client secret")))?;
                jws::sign_token(&claims, alg, SigningKey::Secret(secret), None)?
            }
            _ => {
                let entry = self.registry.signing_key(alg)?;
                jws::sign_token(&claims, alg, entry.into(), Some(&entry.kid))?
            }
        };

        let Some(key_alg) = client.id_token_encrypted_response_alg else {
            return Ok(signed);
        };
        let enc = client
            .id_token_encrypted_response_enc
            .unwrap_or(DEFAULT_ID_TOKEN_ENC);
        match key_alg.family() {
            AlgorithmFamily::Rsa => {
                let jwks = client
                    .jwks
                    .as_ref()
                    .ok_or_else(|| Error::KeyResolution("client has no JWKS for ID token encryption".to_string()))?;
                let (public, kid) = jwe::recipient_key(jwks, key_alg, None)?;
                jwe::encrypt_nested(&signed, key_alg, enc, JweKey::RsaPublic(&public), kid.as_deref())
            }
            _ => {
                let secret = client
                    .secret_bytes()
                    .ok_or_else(|| Error::KeyResolution(format!("{key_alg} requires a client secret")))?;
                jwe::encrypt_nested(&signed, key_alg, enc, JweKey::SharedSecret(secret), None)
            }
        }
    }

    /// `authorization_code` grant. `client` is already authenticated.
    pub async fn exchange_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse> {
        let record = self
            .store
            .consume_authorization_code(&jwt::hash_token(code))
            .await?
            .ok_or(Error::InvalidGrant)?;

        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "authorization code presented by another client");
            return Err(Error::InvalidGrant);
        }
        if redirect_uri != Some(record.redirect_uri.as_str()) {
            return Err(Error::InvalidGrant);
        }
        verify_pkce(
            record.code_challenge.as_deref(),
            record.code_challenge_method.as_deref(),
            code_verifier,
        )?;

        let access = self
            .issue_access_token(
                client,
                &record.subject,
                record.session_id.as_deref(),
                &record.scopes,
                record.token_binding_hash.as_deref(),
            )
            .await?;

        let id_token = if record.scopes.iter().any(|s| s == "openid") {
            Some(self.issue_id_token(
                client,
                &IdTokenParams {
                    subject: &record.subject,
                    session_id: record.session_id.as_deref(),
                    auth_time: record.auth_time,
                    nonce: record.nonce.as_deref(),
                    acr: record.acr.as_deref(),
                    access_token: Some(&access.token),
                    code: None,
                    token_binding_hash: record.token_binding_hash.as_deref(),
                },
            )?)
        } else {
            None
        };

        tracing::info!(client_id = %client.client_id, sub = %record.subject, "authorization code exchanged");
        Ok(TokenResponse {
            access_token: access.token,
            token_type: "Bearer",
            expires_in: access.expires_in,
            id_token,
            scope: (!record.scopes.is_empty()).then(|| record.scopes.join(" ")),
        })
    }

    /// Revoke an access token held by `client` (RFC 7009). Unknown tokens are
    /// not an error.
    pub async fn revoke(&self, client: &Client, token: &str) -> Result<()> {
        let revoked = self
            .store
            .revoke_token(&jwt::hash_token(token), Some(&client.client_id))
            .await?;
        tracing::debug!(client_id = %client.client_id, revoked, "token revocation");
        Ok(())
    }
}

/// Check a PKCE `code_verifier` against the stored challenge (RFC 7636).
pub fn verify_pkce(challenge: Option<&str>, method: Option<&str>, verifier: Option<&str>) -> Result<()> {
    let Some(challenge) = challenge else {
        return Ok(());
    };
    let verifier = verifier.ok_or(Error::InvalidGrant)?;
    let computed = match method.unwrap_or("plain") {
        "S256" => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        "plain" => verifier.to_string(),
        _ => return Err(Error::InvalidGrant),
    };
    if computed.as_bytes().ct_eq(challenge.as_bytes()).unwrap_u8() == 0 {
        return Err(Error::InvalidGrant);
    }
    Ok(())
}
