//! JSON Web Algorithm identifiers (RFC 7518).
//!
//! Every algorithm the server understands is a variant of one of three closed
//! enums. Parsing an unknown name fails with [`Error::UnsupportedAlgorithm`].

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmFamily {
    None,
    Hmac,
    Rsa,
    Ec,
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// HMAC over the concatenation of `parts`.
    pub fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        fn run<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
            let mut mac = <M as Mac>::new_from_slice(key)
                .map_err(|e| Error::Signing(format!("HMAC key: {e}")))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        match self {
            Self::Sha256 => run::<Hmac<Sha256>>(key, parts),
            Self::Sha384 => run::<Hmac<Sha384>>(key, parts),
            Self::Sha512 => run::<Hmac<Sha512>>(key, parts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// Byte length of one affine coordinate.
    pub fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "P-256" => Ok(Self::P256),
            "P-384" => Ok(Self::P384),
            "P-521" => Ok(Self::P521),
            other => Err(Error::UnsupportedAlgorithm(format!("curve {other}"))),
        }
    }
}

// --- JWS ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "HS384")]
    Hs384,
    #[serde(rename = "HS512")]
    Hs512,
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "RS384")]
    Rs384,
    #[serde(rename = "RS512")]
    Rs512,
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "ES384")]
    Es384,
    #[serde(rename = "ES512")]
    Es512,
    #[serde(rename = "PS256")]
    Ps256,
    #[serde(rename = "PS384")]
    Ps384,
    #[serde(rename = "PS512")]
    Ps512,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 13] = [
        Self::None,
        Self::Hs256,
        Self::Hs384,
        Self::Hs512,
        Self::Rs256,
        Self::Rs384,
        Self::Rs512,
        Self::Es256,
        Self::Es384,
        Self::Es512,
        Self::Ps256,
        Self::Ps384,
        Self::Ps512,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
        }
    }

    pub fn family(self) -> AlgorithmFamily {
        match self {
            Self::None => AlgorithmFamily::None,
            Self::Hs256 | Self::Hs384 | Self::Hs512 => AlgorithmFamily::Hmac,
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                AlgorithmFamily::Rsa
            }
            Self::Es256 | Self::Es384 | Self::Es512 => AlgorithmFamily::Ec,
        }
    }

    /// Digest used by the algorithm; `none` reports SHA-256 so that
    /// `at_hash`/`c_hash` stay computable for unsigned tokens.
    pub fn hash(self) -> HashAlg {
        match self {
            Self::None | Self::Hs256 | Self::Rs256 | Self::Es256 | Self::Ps256 => HashAlg::Sha256,
            Self::Hs384 | Self::Rs384 | Self::Es384 | Self::Ps384 => HashAlg::Sha384,
            Self::Hs512 | Self::Rs512 | Self::Es512 | Self::Ps512 => HashAlg::Sha512,
        }
    }

    pub fn curve(self) -> Option<Curve> {
        match self {
            Self::Es256 => Some(Curve::P256),
            Self::Es384 => Some(Curve::P384),
            Self::Es512 => Some(Curve::P521),
            _ => None,
        }
    }

    pub fn is_asymmetric(self) -> bool {
        matches!(self.family(), AlgorithmFamily::Rsa | AlgorithmFamily::Ec)
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            // The original server accepted "NONE" as well as the registered "none".
            .find(|alg| alg.as_str() == s || (*alg == Self::None && s == "NONE"))
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- JWE key management ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyEncryptionAlgorithm {
    #[serde(rename = "RSA1_5")]
    Rsa1_5,
    #[serde(rename = "RSA-OAEP")]
    RsaOaep,
    #[serde(rename = "A128KW")]
    A128Kw,
    #[serde(rename = "A256KW")]
    A256Kw,
}

impl KeyEncryptionAlgorithm {
    pub const ALL: [KeyEncryptionAlgorithm; 4] =
        [Self::Rsa1_5, Self::RsaOaep, Self::A128Kw, Self::A256Kw];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa1_5 => "RSA1_5",
            Self::RsaOaep => "RSA-OAEP",
            Self::A128Kw => "A128KW",
            Self::A256Kw => "A256KW",
        }
    }

    pub fn family(self) -> AlgorithmFamily {
        match self {
            Self::Rsa1_5 | Self::RsaOaep => AlgorithmFamily::Rsa,
            Self::A128Kw | Self::A256Kw => AlgorithmFamily::Aes,
        }
    }

    /// Key-encryption key length in bytes for AES key wrap.
    pub fn kek_len(self) -> Option<usize> {
        match self {
            Self::A128Kw => Some(16),
            Self::A256Kw => Some(32),
            Self::Rsa1_5 | Self::RsaOaep => None,
        }
    }
}

impl FromStr for KeyEncryptionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for KeyEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- JWE content encryption ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncryptionAlgorithm {
    #[serde(rename = "A128GCM")]
    A128Gcm,
    #[serde(rename = "A256GCM")]
    A256Gcm,
    #[serde(rename = "A128CBC-HS256")]
    A128CbcHs256,
    #[serde(rename = "A256CBC-HS512")]
    A256CbcHs512,
}

impl ContentEncryptionAlgorithm {
    pub const ALL: [ContentEncryptionAlgorithm; 4] =
        [Self::A128Gcm, Self::A256Gcm, Self::A128CbcHs256, Self::A256CbcHs512];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    /// Content-encryption key length in bytes. Composite modes carry the
    /// MAC key and the encryption key back to back.
    pub fn cek_len(self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A256Gcm => 32,
            Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::A128Gcm | Self::A256Gcm => 12,
            Self::A128CbcHs256 | Self::A256CbcHs512 => 16,
        }
    }
}

impl FromStr for ContentEncryptionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for ContentEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_algorithm_names_roundtrip() {
        for alg in SignatureAlgorithm::ALL {
            assert_eq!(alg.as_str().parse::<SignatureAlgorithm>().unwrap(), alg);
        }
        assert_eq!("NONE".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::None);
    }

    #[test]
    fn pre_standard_composite_names_are_rejected() {
        let err = "A128CBC+HS256".parse::<ContentEncryptionAlgorithm>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn serde_uses_registered_names() {
        let json = serde_json::to_string(&KeyEncryptionAlgorithm::RsaOaep).unwrap();
        assert_eq!(json, "\"RSA-OAEP\"");
        let enc: ContentEncryptionAlgorithm = serde_json::from_str("\"A256CBC-HS512\"").unwrap();
        assert_eq!(enc, ContentEncryptionAlgorithm::A256CbcHs512);
    }

    #[test]
    fn families_and_curves() {
        assert_eq!(SignatureAlgorithm::Ps384.family(), AlgorithmFamily::Rsa);
        assert_eq!(SignatureAlgorithm::Es512.curve(), Some(Curve::P521));
        assert_eq!(SignatureAlgorithm::Hs512.hash(), HashAlg::Sha512);
        assert_eq!(KeyEncryptionAlgorithm::A256Kw.kek_len(), Some(32));
        assert_eq!(ContentEncryptionAlgorithm::A256CbcHs512.cek_len(), 64);
    }
}
