//! Compact serialization of JOSE objects.
//!
//! This module only frames tokens: base64url segments, headers and the
//! signing input. Signing lives in [`crate::jws`], encryption in
//! [`crate::jwe`].

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::jwa::{ContentEncryptionAlgorithm, KeyEncryptionAlgorithm, SignatureAlgorithm};

/// Ordered claim name to value mapping.
pub type ClaimSet = Map<String, Value>;

/// JOSE header shared by JWS and JWE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    pub fn jws(alg: SignatureAlgorithm) -> Self {
        Self {
            alg: alg.as_str().to_string(),
            enc: None,
            kid: None,
            typ: Some("JWT".to_string()),
            cty: None,
            extra: Map::new(),
        }
    }

    pub fn jwe(alg: KeyEncryptionAlgorithm, enc: ContentEncryptionAlgorithm) -> Self {
        Self {
            alg: alg.as_str().to_string(),
            enc: Some(enc.as_str().to_string()),
            kid: None,
            typ: Some("JWT".to_string()),
            cty: None,
            extra: Map::new(),
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn with_cty(mut self, cty: impl Into<String>) -> Self {
        self.cty = Some(cty.into());
        self
    }

    pub fn signature_alg(&self) -> Result<SignatureAlgorithm> {
        self.alg.parse()
    }

    pub fn key_encryption_alg(&self) -> Result<KeyEncryptionAlgorithm> {
        self.alg.parse()
    }

    pub fn content_encryption_alg(&self) -> Result<ContentEncryptionAlgorithm> {
        self.enc
            .as_deref()
            .ok_or_else(|| Error::Decode("JWE header has no \"enc\"".to_string()))?
            .parse()
    }

    /// Whether the payload is itself a compact JWT.
    pub fn is_nested(&self) -> bool {
        self.cty.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("JWT"))
    }
}

/// A parsed three-segment JWS.
#[derive(Debug, Clone)]
pub struct Jws {
    pub header: Header,
    pub claims: ClaimSet,
    /// `header.payload` exactly as received.
    pub signing_input: String,
    pub signature: Vec<u8>,
}

/// The five segments of a compact JWE, decoded but not decrypted.
#[derive(Debug, Clone)]
pub struct JweParts {
    pub header: Header,
    /// Encoded protected header; its ASCII bytes are the AAD.
    pub protected: String,
    pub encrypted_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum CompactToken {
    Jws(Jws),
    Jwe(JweParts),
}

pub fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64_decode(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::Decode(format!("invalid base64url: {e}")))
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str, what: &str) -> Result<T> {
    let bytes = b64_decode(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("invalid {what}: {e}")))
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| Error::Signing(format!("cannot serialize JOSE object: {e}")))?;
    Ok(b64_encode(json))
}

/// Serialize `header` and `payload`, sign `header.payload` with `sign`, and
/// join the three segments.
pub fn encode<T, F>(header: &Header, payload: &T, sign: F) -> Result<String>
where
    T: Serialize,
    F: FnOnce(&[u8]) -> Result<Vec<u8>>,
{
    let signing_input = format!("{}.{}", encode_json(header)?, encode_json(payload)?);
    let signature = sign(signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", b64_encode(signature)))
}

/// Encoded protected header for a JWE.
pub fn encode_header(header: &Header) -> Result<String> {
    encode_json(header)
}

/// Parse a compact JWS. Anything other than three segments is malformed.
pub fn parse(compact: &str) -> Result<Jws> {
    let segments: Vec<&str> = compact.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }
    parse_jws_segments(&segments)
}

/// Parse a compact JWE. Anything other than five segments is malformed.
pub fn parse_jwe(compact: &str) -> Result<JweParts> {
    let segments: Vec<&str> = compact.split('.').collect();
    if segments.len() != 5 {
        return Err(Error::MalformedToken(format!(
            "expected 5 segments, found {}",
            segments.len()
        )));
    }
    parse_jwe_segments(&segments)
}

/// Parse either shape, dispatching on segment count.
pub fn parse_compact(compact: &str) -> Result<CompactToken> {
    let segments: Vec<&str> = compact.split('.').collect();
    match segments.len() {
        3 => parse_jws_segments(&segments).map(CompactToken::Jws),
        5 => parse_jwe_segments(&segments).map(CompactToken::Jwe),
        n => Err(Error::MalformedToken(format!(
            "expected 3 or 5 segments, found {n}"
        ))),
    }
}

fn parse_jws_segments(segments: &[&str]) -> Result<Jws> {
    let header: Header = decode_json(segments[0], "header")?;
    let claims: ClaimSet = decode_json(segments[1], "payload")?;
    let signature = b64_decode(segments[2])?;
    Ok(Jws {
        header,
        claims,
        signing_input: format!("{}.{}", segments[0], segments[1]),
        signature,
    })
}

fn parse_jwe_segments(segments: &[&str]) -> Result<JweParts> {
    let header: Header = decode_json(segments[0], "header")?;
    if header.enc.is_none() {
        return Err(Error::Decode("JWE header has no \"enc\"".to_string()));
    }
    Ok(JweParts {
        header,
        protected: segments[0].to_string(),
        encrypted_key: b64_decode(segments[1])?,
        iv: b64_decode(segments[2])?,
        ciphertext: b64_decode(segments[3])?,
        tag: b64_decode(segments[4])?,
    })
}

/// Random opaque token and the hash that is stored for it.
pub fn generate_opaque_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&token);
    (token, hash)
}

/// SHA-256 hex of an opaque token.
pub fn hash_token(token: &str) -> String {
    let hash = Sha256::digest(token.as_bytes());
    hex::encode(hash)
}
