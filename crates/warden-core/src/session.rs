//! End-user sessions established by the external login UI.
//!
//! The session is a JWS signed with the registry's session key and carried in
//! the `<cookie_prefix>_session` cookie.

use std::borrow::Cow;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jwt;
use crate::jws;
use crate::keys::{KeyAlgorithm, KeyRegistry, VerificationKey};

/// Session token claims.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionClaims {
    pub sub: String,
    pub sid: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
}

/// The authenticated end user behind a request.
#[derive(Debug, Clone, PartialEq)]
pub struct EndUser {
    pub subject: String,
    pub session_id: String,
    pub auth_time: i64,
    pub acr: Option<String>,
}

impl From<SessionClaims> for EndUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            subject: claims.sub,
            session_id: claims.sid,
            auth_time: claims.auth_time,
            acr: claims.acr,
        }
    }
}

pub fn session_cookie_name(prefix: &str) -> String {
    format!("{prefix}_session")
}

/// Sign a session token for `user`. Used by the login UI and tests.
pub fn sign_session(registry: &KeyRegistry, issuer: &str, user: &EndUser, ttl_secs: u64) -> Result<String> {
    let entry = registry.session_key()?;
    let KeyAlgorithm::Signature(alg) = entry.alg else {
        return Err(Error::KeyResolution(format!("session key '{}' is not a signing key", entry.kid)));
    };
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user.subject.clone(),
        sid: user.session_id.clone(),
        iss: issuer.to_string(),
        aud: issuer.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs as i64)).timestamp(),
        auth_time: user.auth_time,
        acr: user.acr.clone(),
    };
    jws::sign_token(&claims, alg, entry.into(), Some(&entry.kid))
}

/// Verify a session token. Only the session key and its algorithm are
/// accepted, the token must be issued by and for `issuer`, and it must not be
/// expired.
pub fn verify_session(registry: &KeyRegistry, issuer: &str, token: &str) -> Result<EndUser> {
    let parsed = jwt::parse(token).map_err(|_| Error::InvalidToken)?;
    let entry = registry.session_key()?;
    let KeyAlgorithm::Signature(alg) = entry.alg else {
        return Err(Error::KeyResolution(format!("session key '{}' is not a signing key", entry.kid)));
    };
    if parsed.header.kid.as_deref() != Some(entry.kid.as_str())
        || !alg.is_asymmetric()
        || parsed.header.signature_alg().ok() != Some(alg)
    {
        return Err(Error::InvalidToken);
    }
    let key = VerificationKey::Public(Cow::Borrowed(&entry.public));
    let valid = alg
        .scheme()
        .verify(parsed.signing_input.as_bytes(), &parsed.signature, &key)
        .map_err(|_| Error::InvalidToken)?;
    if !valid {
        return Err(Error::InvalidToken);
    }
    let claims: SessionClaims = serde_json::from_value(serde_json::Value::Object(parsed.claims))
        .map_err(|_| Error::InvalidToken)?;
    if claims.iss != issuer || claims.aud != issuer || claims.exp <= Utc::now().timestamp() {
        return Err(Error::InvalidToken);
    }
    Ok(claims.into())
}
