//! JSON Web Key Set documents (RFC 7517), both published and consumed.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jwa::{AlgorithmFamily, Curve, KeyEncryptionAlgorithm, SignatureAlgorithm};

use super::{JwkParams, KeyEntry, KeyUse, PublicKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
}

impl Jwk {
    pub fn from_public_key(
        public: &PublicKey,
        kid: &str,
        key_use: KeyUse,
        alg: Option<&str>,
    ) -> Self {
        let mut jwk = Self {
            kty: String::new(),
            kid: Some(kid.to_string()),
            key_use: Some(key_use),
            alg: alg.map(str::to_string),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            x5c: Vec::new(),
        };
        match public.jwk_params() {
            JwkParams::Rsa { n, e } => {
                jwk.kty = "RSA".to_string();
                jwk.n = Some(n);
                jwk.e = Some(e);
            }
            JwkParams::Ec { crv, x, y } => {
                jwk.kty = "EC".to_string();
                jwk.crv = Some(crv.to_string());
                jwk.x = Some(x);
                jwk.y = Some(y);
            }
        }
        jwk
    }

    pub fn from_entry(entry: &KeyEntry) -> Self {
        let mut jwk = Self::from_public_key(&entry.public, &entry.kid, entry.key_use, Some(entry.alg.as_str()));
        jwk.x5c = entry.x5c.clone();
        jwk
    }

    /// Decode the key material carried by this JWK.
    pub fn to_public_key(&self) -> Result<PublicKey> {
        let label = self.kid.as_deref().unwrap_or("<no kid>");
        match self.kty.as_str() {
            "RSA" => {
                let n = decode_member(label, "n", self.n.as_deref())?;
                let e = decode_member(label, "e", self.e.as_deref())?;
                let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                    .map_err(|err| Error::KeyResolution(format!("invalid RSA key '{label}': {err}")))?;
                Ok(PublicKey::Rsa(key))
            }
            "EC" => {
                let crv: Curve = self
                    .crv
                    .as_deref()
                    .ok_or_else(|| Error::KeyResolution(format!("EC key '{label}' has no crv")))?
                    .parse()
                    .map_err(|_| Error::KeyResolution(format!("EC key '{label}' has an unknown curve")))?;
                let x = decode_member(label, "x", self.x.as_deref())?;
                let y = decode_member(label, "y", self.y.as_deref())?;
                PublicKey::from_ec_coordinates(crv, &x, &y)
            }
            other => Err(Error::KeyResolution(format!(
                "unsupported key type '{other}' for '{label}'"
            ))),
        }
    }

    /// Whether this JWK could serve `family` for `key_use`. A JWK without
    /// `use` is usable for either.
    fn usable_for(&self, family: AlgorithmFamily, key_use: KeyUse) -> bool {
        let kty_matches = match family {
            AlgorithmFamily::Rsa => self.kty == "RSA",
            AlgorithmFamily::Ec => self.kty == "EC",
            _ => false,
        };
        kty_matches && self.key_use.is_none_or(|u| u == key_use)
    }
}

fn decode_member(label: &str, member: &str, value: Option<&str>) -> Result<Vec<u8>> {
    let value = value
        .ok_or_else(|| Error::KeyResolution(format!("key '{label}' is missing '{member}'")))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| Error::KeyResolution(format!("key '{label}' has invalid '{member}'")))
}

impl Jwks {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Public key for `kid`; a missing kid is a resolution failure.
    pub fn public_key(&self, kid: &str) -> Result<PublicKey> {
        self.find(kid)
            .ok_or_else(|| Error::KeyResolution(format!("kid '{kid}' not found in JWKS")))?
            .to_public_key()
    }

    /// First key able to serve a signature algorithm, preferring exact
    /// `alg` matches.
    pub fn select_for_signature(&self, alg: SignatureAlgorithm) -> Option<&Jwk> {
        self.select(alg.as_str(), alg.family(), KeyUse::Sig, |jwk| {
            alg.curve().is_none_or(|curve| jwk.crv.as_deref() == Some(curve.as_str()))
        })
    }

    /// First key able to receive content encrypted with `alg`.
    pub fn select_for_encryption(&self, alg: KeyEncryptionAlgorithm) -> Option<&Jwk> {
        self.select(alg.as_str(), alg.family(), KeyUse::Enc, |_| true)
    }

    fn select(
        &self,
        alg: &str,
        family: AlgorithmFamily,
        key_use: KeyUse,
        extra: impl Fn(&Jwk) -> bool,
    ) -> Option<&Jwk> {
        let candidates: Vec<&Jwk> = self
            .keys
            .iter()
            .filter(|k| k.usable_for(family, key_use) && extra(k))
            .collect();
        candidates
            .iter()
            .find(|k| k.alg.as_deref() == Some(alg))
            .or_else(|| candidates.iter().find(|k| k.alg.is_none()))
            .copied()
    }
}
