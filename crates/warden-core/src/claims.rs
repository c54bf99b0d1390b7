//! Claim sets carried in state tokens and request objects.
//!
//! Builders are consumed by value and finalized once by `encode`. How the
//! result is protected (signed or encrypted, never both) is chosen with
//! [`Protection`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::jwa::{AlgorithmFamily, ContentEncryptionAlgorithm, KeyEncryptionAlgorithm, SignatureAlgorithm};
use crate::jwe::{self, JweKey};
use crate::jws::{self, SigningKey};
use crate::jwt::{self, ClaimSet, CompactToken};
use crate::keys::{Jwks, KeyRegistry};

/// How an encoded claim set is protected.
#[derive(Debug, Clone, Copy)]
pub enum Protection<'a> {
    Signed {
        alg: SignatureAlgorithm,
        key: SigningKey<'a>,
        kid: Option<&'a str>,
    },
    Encrypted {
        alg: KeyEncryptionAlgorithm,
        enc: ContentEncryptionAlgorithm,
        key: JweKey<'a>,
        kid: Option<&'a str>,
    },
}

impl Protection<'_> {
    pub fn protect<T: Serialize>(&self, claims: &T) -> Result<String> {
        match *self {
            Protection::Signed { alg, key, kid } => jws::sign_token(claims, alg, key, kid),
            Protection::Encrypted { alg, enc, key, kid } => jwe::encrypt_claims(claims, alg, enc, key, kid),
        }
    }
}

/// Keys available for opening an inbound token.
#[derive(Debug, Clone, Copy)]
pub struct OpeningKeys<'a> {
    pub registry: &'a KeyRegistry,
    /// Sender's published keys, used instead of the keystore for signatures.
    pub jwks: Option<&'a Jwks>,
    /// Sender's shared secret for HMAC and AES key wrap.
    pub shared_secret: Option<&'a [u8]>,
}

/// Claims recovered from a JWS, a JWE or a JWE wrapping a JWS.
#[derive(Debug, Clone)]
pub struct Opened {
    pub claims: ClaimSet,
    /// Algorithm of the (inner) signature; `None` for a plain JWE.
    pub signature_alg: Option<SignatureAlgorithm>,
    pub signature_valid: bool,
    pub encrypted: bool,
}

/// Decrypt and verify a compact token. A bad signature is reported through
/// [`Opened::signature_valid`], not as an error.
pub fn open(compact: &str, keys: OpeningKeys<'_>) -> Result<Opened> {
    match jwt::parse_compact(compact)? {
        CompactToken::Jws(token) => {
            let alg = token.header.signature_alg()?;
            let valid = jws::verify_token(keys.registry, &token, keys.jwks, keys.shared_secret)?;
            Ok(Opened {
                claims: token.claims,
                signature_alg: Some(alg),
                signature_valid: valid,
                encrypted: false,
            })
        }
        CompactToken::Jwe(parts) => {
            let alg = parts.header.key_encryption_alg()?;
            let key = match alg.family() {
                AlgorithmFamily::Rsa => {
                    JweKey::RsaPrivate(keys.registry.decryption_key(parts.header.kid.as_deref())?)
                }
                _ => JweKey::SharedSecret(keys.shared_secret.ok_or_else(|| {
                    Error::KeyResolution(format!("{alg} requires a shared secret"))
                })?),
            };
            let decrypted = jwe::decrypt_parts(&parts, key)?;
            match decrypted.nested_jws()? {
                Some(inner) => {
                    let alg = inner.header.signature_alg()?;
                    let valid = jws::verify_token(keys.registry, &inner, keys.jwks, keys.shared_secret)?;
                    Ok(Opened {
                        claims: inner.claims,
                        signature_alg: Some(alg),
                        signature_valid: valid,
                        encrypted: true,
                    })
                }
                None => Ok(Opened {
                    claims: decrypted.claims()?,
                    signature_alg: None,
                    signature_valid: false,
                    encrypted: true,
                }),
            }
        }
    }
}

// --- State ---

/// Claims of a `state` JWT (draft-bradley-oauth-jwt-encoded-state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateClaims {
    /// Request forgery protection value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_claims: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link_uri: Option<String>,
    /// Authorization server the state was issued for.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub authorization_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
}

impl StateClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rfp(mut self, rfp: impl Into<String>) -> Self {
        self.rfp = Some(rfp.into());
        self
    }

    pub fn jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    pub fn additional_claims(mut self, claims: Map<String, Value>) -> Self {
        self.additional_claims = Some(claims);
        self
    }

    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    pub fn issued_at(mut self, iat: i64) -> Self {
        self.iat = Some(iat);
        self
    }

    pub fn expires_at(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    pub fn kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn target_link_uri(mut self, uri: impl Into<String>) -> Self {
        self.target_link_uri = Some(uri.into());
        self
    }

    pub fn authorization_server(mut self, server: impl Into<String>) -> Self {
        self.authorization_server = Some(server.into());
        self
    }

    pub fn at_hash(mut self, hash: impl Into<String>) -> Self {
        self.at_hash = Some(hash.into());
        self
    }

    pub fn c_hash(mut self, hash: impl Into<String>) -> Self {
        self.c_hash = Some(hash.into());
        self
    }

    pub fn to_encoded_jwt(&self, protection: Protection<'_>) -> Result<String> {
        protection.protect(self)
    }

    /// Open a state token. Signed state must verify and an `exp` in the
    /// past is rejected.
    pub fn decode(compact: &str, keys: OpeningKeys<'_>) -> Result<Self> {
        let opened = open(compact, keys)?;
        if opened.signature_alg.is_some() && !opened.signature_valid {
            return Err(Error::InvalidToken);
        }
        if opened.signature_alg == Some(SignatureAlgorithm::None) && !opened.encrypted {
            return Err(Error::InvalidToken);
        }
        let state: StateClaims = serde_json::from_value(Value::Object(opened.claims))
            .map_err(|e| Error::Decode(format!("invalid state claims: {e}")))?;
        if state.exp.is_some_and(|exp| exp < chrono::Utc::now().timestamp()) {
            return Err(Error::InvalidToken);
        }
        Ok(state)
    }
}

// --- Request objects ---

/// Constraint on one requested claim. `None` where a request is accepted
/// means the claim is requested without constraints and encodes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl ClaimRequest {
    pub fn essential(essential: bool) -> Self {
        Self {
            essential: Some(essential),
            ..Self::default()
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            values: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Whether `candidate` satisfies `value`/`values`.
    pub fn admits(&self, candidate: &Value) -> bool {
        self.value.as_ref().is_none_or(|v| v == candidate)
            && self.values.as_ref().is_none_or(|vs| vs.contains(candidate))
    }
}

/// Requested claims, grouped by where they are to be returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsRequest {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub userinfo: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub id_token: Map<String, Value>,
}

impl ClaimsRequest {
    fn lookup(group: &Map<String, Value>, name: &str) -> Option<Option<ClaimRequest>> {
        match group.get(name)? {
            Value::Null => Some(None),
            other => match serde_json::from_value(other.clone()) {
                Ok(request) => Some(Some(request)),
                Err(e) => {
                    tracing::debug!(claim = name, error = %e, "ignoring malformed claim request");
                    Some(None)
                }
            },
        }
    }

    /// Every member must be `null` or a claim request object.
    pub fn validate(&self) -> Result<()> {
        for (group, claims) in [("userinfo", &self.userinfo), ("id_token", &self.id_token)] {
            for (name, value) in claims {
                if value.is_null() {
                    continue;
                }
                serde_json::from_value::<ClaimRequest>(value.clone()).map_err(|e| {
                    Error::BadRequest(format!("malformed request for claim '{name}' in {group}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// `Some(None)` when the claim is requested without constraints.
    pub fn id_token_claim(&self, name: &str) -> Option<Option<ClaimRequest>> {
        Self::lookup(&self.id_token, name)
    }

    pub fn user_info_claim(&self, name: &str) -> Option<Option<ClaimRequest>> {
        Self::lookup(&self.userinfo, name)
    }

    pub fn is_empty(&self) -> bool {
        self.userinfo.is_empty() && self.id_token.is_empty()
    }
}

fn request_value(request: Option<ClaimRequest>) -> Value {
    match request {
        Some(request) => serde_json::to_value(request).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Builder for a request object.
#[derive(Debug, Clone, Default)]
pub struct RequestObjectClaims {
    params: ClaimSet,
    claims: ClaimsRequest,
}

impl RequestObjectClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a top-level authorization request parameter.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn response_type(self, value: &str) -> Self {
        self.param("response_type", value)
    }

    pub fn client_id(self, value: &str) -> Self {
        self.param("client_id", value)
    }

    pub fn scope(self, value: &str) -> Self {
        self.param("scope", value)
    }

    pub fn redirect_uri(self, value: &str) -> Self {
        self.param("redirect_uri", value)
    }

    pub fn state(self, value: &str) -> Self {
        self.param("state", value)
    }

    pub fn nonce(self, value: &str) -> Self {
        self.param("nonce", value)
    }

    pub fn prompt(self, value: &str) -> Self {
        self.param("prompt", value)
    }

    pub fn login_hint(self, value: &str) -> Self {
        self.param("login_hint", value)
    }

    pub fn code_challenge(self, challenge: &str, method: &str) -> Self {
        self.param("code_challenge", challenge)
            .param("code_challenge_method", method)
    }

    pub fn issuer(self, value: &str) -> Self {
        self.param("iss", value)
    }

    pub fn audience(self, value: &str) -> Self {
        self.param("aud", value)
    }

    pub fn expires_at(self, exp: i64) -> Self {
        self.param("exp", exp)
    }

    pub fn not_before(self, nbf: i64) -> Self {
        self.param("nbf", nbf)
    }

    pub fn issued_at(self, iat: i64) -> Self {
        self.param("iat", iat)
    }

    pub fn jti(self, value: &str) -> Self {
        self.param("jti", value)
    }

    /// Maximum authentication age in seconds.
    pub fn max_age(self, seconds: u64) -> Self {
        self.param("max_age", seconds)
    }

    pub fn acr_values(self, values: &[&str]) -> Self {
        self.param("acr_values", values.join(" "))
    }

    pub fn add_user_info_claim(mut self, name: &str, request: Option<ClaimRequest>) -> Self {
        self.claims.userinfo.insert(name.to_string(), request_value(request));
        self
    }

    pub fn add_id_token_claim(mut self, name: &str, request: Option<ClaimRequest>) -> Self {
        self.claims.id_token.insert(name.to_string(), request_value(request));
        self
    }

    pub fn to_claim_set(&self) -> ClaimSet {
        let mut set = self.params.clone();
        if !self.claims.is_empty() {
            set.insert("claims".to_string(), serde_json::to_value(&self.claims).unwrap_or(Value::Null));
        }
        set
    }

    pub fn encode(self, protection: Protection<'_>) -> Result<String> {
        protection.protect(&self.to_claim_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, CLIENT_SECRET};
    use serde_json::json;

    fn keys(registry: &KeyRegistry) -> OpeningKeys<'_> {
        OpeningKeys {
            registry,
            jwks: None,
            shared_secret: Some(CLIENT_SECRET.as_bytes()),
        }
    }

    #[test]
    fn state_claims_signed_roundtrip() {
        let registry = test_support::registry();
        let entry = registry.signing_key(SignatureAlgorithm::Rs256).unwrap();
        let mut extra = Map::new();
        extra.insert("return_to".into(), json!("/home"));

        let state = StateClaims::new()
            .rfp("rfp-value")
            .jti("jti-1")
            .additional_claims(extra)
            .issuer(test_support::ISSUER)
            .authorization_server("https://as.example.com");
        let token = state
            .to_encoded_jwt(Protection::Signed {
                alg: SignatureAlgorithm::Rs256,
                key: entry.into(),
                kid: Some(&entry.kid),
            })
            .unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = StateClaims::decode(&token, keys(&registry)).unwrap();
        assert_eq!(decoded, state);
        let raw = jwt::parse(&token).unwrap();
        assert_eq!(raw.claims["as"], "https://as.example.com");
        assert_eq!(raw.claims["additional_claims"]["return_to"], "/home");
    }

    #[test]
    fn state_claims_encrypted_roundtrip() {
        let registry = test_support::registry();
        let state = StateClaims::new().rfp("r").jti("j");
        let token = state
            .to_encoded_jwt(Protection::Encrypted {
                alg: KeyEncryptionAlgorithm::A256Kw,
                enc: ContentEncryptionAlgorithm::A256Gcm,
                key: JweKey::SharedSecret(CLIENT_SECRET.as_bytes()),
                kid: None,
            })
            .unwrap();
        assert_eq!(token.split('.').count(), 5);
        assert_eq!(StateClaims::decode(&token, keys(&registry)).unwrap(), state);
    }

    #[test]
    fn expired_state_rejected() {
        let registry = test_support::registry();
        let token = StateClaims::new()
            .rfp("r")
            .expires_at(chrono::Utc::now().timestamp() - 10)
            .to_encoded_jwt(Protection::Signed {
                alg: SignatureAlgorithm::Hs256,
                key: SigningKey::Secret(CLIENT_SECRET.as_bytes()),
                kid: None,
            })
            .unwrap();
        assert!(matches!(StateClaims::decode(&token, keys(&registry)), Err(Error::InvalidToken)));
    }

    #[test]
    fn unsigned_or_forged_state_rejected() {
        let registry = test_support::registry();
        let unsigned = StateClaims::new()
            .rfp("r")
            .to_encoded_jwt(Protection::Signed {
                alg: SignatureAlgorithm::None,
                key: SigningKey::Unsigned,
                kid: None,
            })
            .unwrap();
        assert!(matches!(StateClaims::decode(&unsigned, keys(&registry)), Err(Error::InvalidToken)));

        let forged = StateClaims::new()
            .rfp("r")
            .to_encoded_jwt(Protection::Signed {
                alg: SignatureAlgorithm::Hs256,
                key: SigningKey::Secret(b"another secret"),
                kid: None,
            })
            .unwrap();
        assert!(matches!(StateClaims::decode(&forged, keys(&registry)), Err(Error::InvalidToken)));
    }

    #[test]
    fn claim_groups_are_independent() {
        let claims = RequestObjectClaims::new()
            .add_user_info_claim("email", Some(ClaimRequest::essential(true)))
            .add_id_token_claim("email", Some(ClaimRequest::value("alice@example.com")))
            .add_id_token_claim("acr", Some(ClaimRequest::values(["urn:mace:incommon:iap:silver", "basic"])))
            .add_user_info_claim("name", None)
            .max_age(600)
            .to_claim_set();

        assert_eq!(claims["max_age"], 600);
        assert_eq!(claims["claims"]["userinfo"]["email"], json!({"essential": true}));
        assert_eq!(claims["claims"]["id_token"]["email"], json!({"value": "alice@example.com"}));
        assert_eq!(claims["claims"]["id_token"]["acr"]["values"][1], "basic");
        assert_eq!(claims["claims"]["userinfo"]["name"], Value::Null);
    }

    #[test]
    fn empty_groups_are_omitted() {
        let claims = RequestObjectClaims::new().client_id("c").to_claim_set();
        assert!(claims.get("claims").is_none());
        let claims = RequestObjectClaims::new()
            .add_id_token_claim("auth_time", Some(ClaimRequest::essential(true)))
            .to_claim_set();
        assert!(claims["claims"].get("userinfo").is_none());
    }

    #[test]
    fn claims_request_lookup() {
        let request: ClaimsRequest = serde_json::from_value(json!({
            "id_token": {"acr": {"values": ["a", "b"]}, "auth_time": null}
        }))
        .unwrap();
        let acr = request.id_token_claim("acr").unwrap().unwrap();
        assert!(acr.admits(&json!("b")));
        assert!(!acr.admits(&json!("c")));
        assert_eq!(request.id_token_claim("auth_time"), Some(None));
        assert_eq!(request.id_token_claim("missing"), None);
        assert_eq!(request.user_info_claim("acr"), None);
        request.validate().unwrap();
    }

    #[test]
    fn malformed_claim_request_is_reported() {
        let request: ClaimsRequest = serde_json::from_value(json!({
            "id_token": {"acr": {"values": "gold"}},
            "userinfo": {"email": null}
        }))
        .unwrap();
        let err = request.validate().unwrap_err();
        assert!(matches!(&err, Error::BadRequest(msg) if msg.contains("'acr'")), "got: {err}");
        assert_eq!(err.error_code(), "invalid_request");
        // Lookups still answer, treating the claim as unconstrained.
        assert_eq!(request.id_token_claim("acr"), Some(None));
        assert_eq!(request.user_info_claim("email"), Some(None));
    }

    #[test]
    fn request_object_encodes_with_either_protection() {
        let registry = test_support::registry();
        let entry = registry.signing_key(SignatureAlgorithm::Es512).unwrap();
        let builder = RequestObjectClaims::new()
            .client_id("client-1")
            .response_type("code")
            .add_id_token_claim("acr", Some(ClaimRequest::essential(true)));

        let signed = builder
            .clone()
            .encode(Protection::Signed {
                alg: SignatureAlgorithm::Es512,
                key: entry.into(),
                kid: Some(&entry.kid),
            })
            .unwrap();
        let opened = open(&signed, keys(&registry)).unwrap();
        assert!(opened.signature_valid);
        assert_eq!(opened.claims["client_id"], "client-1");

        let oaep = registry.store().entry(test_support::RSA_OAEP_KID).unwrap();
        let encrypted = builder
            .encode(Protection::Encrypted {
                alg: KeyEncryptionAlgorithm::RsaOaep,
                enc: ContentEncryptionAlgorithm::A128CbcHs256,
                key: JweKey::RsaPublic(oaep.public.as_rsa().unwrap()),
                kid: Some(test_support::RSA_OAEP_KID),
            })
            .unwrap();
        let opened = open(&encrypted, keys(&registry)).unwrap();
        assert!(opened.encrypted);
        assert_eq!(opened.signature_alg, None);
        assert_eq!(opened.claims["claims"]["id_token"]["acr"]["essential"], true);
    }
}
