//! Compact JWE (RFC 7516).
//!
//! A fresh CEK and IV are generated per token. The encoded protected header is
//! the AAD. Every decryption failure after the header has been parsed is
//! reported as [`Error::Decryption`] with no detail.

mod content;
mod key_management;

use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::jwa::{ContentEncryptionAlgorithm, KeyEncryptionAlgorithm};
use crate::jwt::{self, ClaimSet, Header, Jws, JweParts};
use crate::keys::Jwks;

pub use content::{ContentCipher, Sealed};
pub use key_management::{JweKey, KeyManagement, derive_kek};

/// A decrypted JWE.
#[derive(Debug, Clone)]
pub struct Jwe {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Jwe {
    pub fn claims(&self) -> Result<ClaimSet> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::Decode(format!("invalid JWE payload: {e}")))
    }

    /// The inner JWS when the payload is a nested JWT (`cty: JWT`).
    pub fn nested_jws(&self) -> Result<Option<Jws>> {
        if !self.header.is_nested() {
            return Ok(None);
        }
        let compact = std::str::from_utf8(&self.payload)
            .map_err(|_| Error::Decode("nested JWT is not UTF-8".to_string()))?;
        jwt::parse(compact.trim()).map(Some)
    }
}

/// Encrypt `payload` under the `alg`/`enc` pair named in `header`.
pub fn encrypt(header: &Header, payload: &[u8], key: JweKey<'_>) -> Result<String> {
    let alg = header.key_encryption_alg()?;
    let enc = header.content_encryption_alg()?;

    let mut cek = Zeroizing::new(vec![0u8; enc.cek_len()]);
    OsRng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; enc.iv_len()];
    OsRng.fill_bytes(&mut iv);

    let encrypted_key = alg.key_management().wrap(&cek, key)?;
    let protected = jwt::encode_header(header)?;
    let sealed = enc.cipher().encrypt(&cek, &iv, protected.as_bytes(), payload)?;

    Ok(format!(
        "{protected}.{}.{}.{}.{}",
        jwt::b64_encode(&encrypted_key),
        jwt::b64_encode(&iv),
        jwt::b64_encode(&sealed.ciphertext),
        jwt::b64_encode(&sealed.tag),
    ))
}

/// Serialize `claims` and encrypt them.
pub fn encrypt_claims<T: Serialize>(
    claims: &T,
    alg: KeyEncryptionAlgorithm,
    enc: ContentEncryptionAlgorithm,
    key: JweKey<'_>,
    kid: Option<&str>,
) -> Result<String> {
    let mut header = Header::jwe(alg, enc);
    header.kid = kid.map(str::to_string);
    let payload = serde_json::to_vec(claims)
        .map_err(|e| Error::Encryption(format!("cannot serialize claims: {e}")))?;
    encrypt(&header, &payload, key)
}

/// Wrap an already signed compact JWS in a JWE.
pub fn encrypt_nested(
    jws: &str,
    alg: KeyEncryptionAlgorithm,
    enc: ContentEncryptionAlgorithm,
    key: JweKey<'_>,
    kid: Option<&str>,
) -> Result<String> {
    let mut header = Header::jwe(alg, enc).with_cty("JWT");
    header.kid = kid.map(str::to_string);
    encrypt(&header, jws.as_bytes(), key)
}

pub fn decrypt(compact: &str, key: JweKey<'_>) -> Result<Jwe> {
    decrypt_parts(&jwt::parse_jwe(compact)?, key)
}

pub fn decrypt_parts(parts: &JweParts, key: JweKey<'_>) -> Result<Jwe> {
    let alg = parts.header.key_encryption_alg()?;
    let enc = parts.header.content_encryption_alg()?;
    if parts.header.extra.contains_key("zip") {
        return Err(Error::UnsupportedAlgorithm("compressed JWE payloads".to_string()));
    }

    let cek = match alg.key_management().unwrap(&parts.encrypted_key, key, enc.cek_len()) {
        Ok(cek) => cek,
        Err(e @ (Error::KeySize { .. } | Error::KeyResolution(_))) => return Err(e),
        Err(_) => return Err(Error::Decryption),
    };
    let payload = enc
        .cipher()
        .decrypt(&cek, &parts.iv, parts.protected.as_bytes(), &parts.ciphertext, &parts.tag)
        .map_err(|_| Error::Decryption)?;

    Ok(Jwe {
        header: parts.header.clone(),
        payload,
    })
}

/// RSA public key in `jwks` for encrypting with `alg`: the key named by
/// `kid`, else the first `use=enc` key compatible with `alg`.
pub fn recipient_key(
    jwks: &Jwks,
    alg: KeyEncryptionAlgorithm,
    kid: Option<&str>,
) -> Result<(RsaPublicKey, Option<String>)> {
    let jwk = match kid {
        Some(kid) => jwks
            .find(kid)
            .ok_or_else(|| Error::KeyResolution(format!("kid '{kid}' not found in JWKS")))?,
        None => jwks
            .select_for_encryption(alg)
            .ok_or_else(|| Error::KeyResolution(format!("no JWKS key usable for {alg}")))?,
    };
    let public = jwk.to_public_key()?;
    let rsa = public
        .as_rsa()
        .cloned()
        .ok_or_else(|| Error::KeyResolution(format!("{alg} needs an RSA key")))?;
    Ok((rsa, jwk.kid.clone()))
}
