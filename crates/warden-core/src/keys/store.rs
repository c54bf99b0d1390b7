//! On-disk keystore.
//!
//! The keystore is a JSON document listing private keys as PKCS#8 PEM blocks
//! encrypted under a single store secret. Loading decrypts every key once;
//! afterwards the store is immutable.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jwa::{AlgorithmFamily, Curve, KeyEncryptionAlgorithm, SignatureAlgorithm};

use super::{PrivateKey, PublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
    Enc,
}

impl KeyUse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sig => "sig",
            Self::Enc => "enc",
        }
    }
}

/// Algorithm a keystore entry is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Signature(SignatureAlgorithm),
    KeyEncryption(KeyEncryptionAlgorithm),
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signature(alg) => alg.as_str(),
            Self::KeyEncryption(alg) => alg.as_str(),
        }
    }

    pub fn key_use(self) -> KeyUse {
        match self {
            Self::Signature(_) => KeyUse::Sig,
            Self::KeyEncryption(_) => KeyUse::Enc,
        }
    }

    fn family(self) -> AlgorithmFamily {
        match self {
            Self::Signature(alg) => alg.family(),
            Self::KeyEncryption(alg) => alg.family(),
        }
    }

    pub(crate) fn curve(self) -> Option<Curve> {
        match self {
            Self::Signature(alg) => alg.curve(),
            Self::KeyEncryption(_) => None,
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(alg) = s.parse::<SignatureAlgorithm>() {
            return Ok(Self::Signature(alg));
        }
        s.parse::<KeyEncryptionAlgorithm>().map(Self::KeyEncryption)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded keystore entry.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub kid: String,
    pub alg: KeyAlgorithm,
    pub key_use: KeyUse,
    pub private: PrivateKey,
    pub public: PublicKey,
    /// Base64 (standard alphabet) DER certificate chain, leaf first.
    pub x5c: Vec<String>,
}

impl KeyEntry {
    /// Pair a private key with the algorithm it serves, rejecting mismatches.
    pub fn new(kid: impl Into<String>, alg: KeyAlgorithm, private: PrivateKey) -> Result<Self> {
        let kid = kid.into();
        let compatible = match alg.family() {
            AlgorithmFamily::Rsa => private.family() == AlgorithmFamily::Rsa,
            AlgorithmFamily::Ec => private.curve() == alg.curve(),
            AlgorithmFamily::Hmac | AlgorithmFamily::Aes | AlgorithmFamily::None => {
                return Err(Error::KeyLoad(format!(
                    "{alg} keys are shared secrets and do not belong in the keystore (kid '{kid}')"
                )));
            }
        };
        if !compatible {
            return Err(Error::KeyLoad(format!(
                "key '{kid}' ({private:?}) cannot be used for {alg}"
            )));
        }
        let public = private.public_key();
        Ok(Self {
            kid,
            key_use: alg.key_use(),
            alg,
            private,
            public,
            x5c: Vec::new(),
        })
    }

    pub fn with_certificates(mut self, x5c: Vec<String>) -> Self {
        self.x5c = x5c;
        self
    }
}

/// Serialized form of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,
    /// PKCS#8 `ENCRYPTED PRIVATE KEY` PEM block.
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyStoreFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dn_name: Option<String>,
    keys: Vec<StoredKey>,
}

#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    dn_name: Option<String>,
    entries: Vec<KeyEntry>,
    kid_index: HashMap<String, usize>,
}

impl KeyStore {
    /// Build a store from already-loaded entries.
    pub fn from_entries(dn_name: Option<String>, entries: Vec<KeyEntry>) -> Result<Self> {
        let mut kid_index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if kid_index.insert(entry.kid.clone(), i).is_some() {
                return Err(Error::KeyLoad(format!(
                    "duplicate kid '{}', each key must have a unique identifier",
                    entry.kid
                )));
            }
        }
        Ok(Self { dn_name, entries, kid_index })
    }

    /// Read and decrypt a keystore file.
    ///
    /// When `dn_name` is given it must match the distinguished name recorded
    /// in the file.
    pub fn load(path: &Path, store_secret: &str, dn_name: Option<&str>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::KeyLoad(format!("cannot read {}: {e}", path.display())))?;
        let file: KeyStoreFile = serde_json::from_str(&content)
            .map_err(|e| Error::KeyLoad(format!("malformed keystore {}: {e}", path.display())))?;

        if let Some(expected) = dn_name {
            if file.dn_name.as_deref() != Some(expected) {
                return Err(Error::KeyLoad(format!(
                    "keystore {} was not issued for '{expected}'",
                    path.display()
                )));
            }
        }

        let mut entries = Vec::with_capacity(file.keys.len());
        for stored in &file.keys {
            let entry = decrypt_entry(stored, store_secret)?;
            tracing::debug!(kid = %entry.kid, alg = %entry.alg, "loaded key");
            entries.push(entry);
        }

        let store = Self::from_entries(file.dn_name, entries)?;
        tracing::info!(path = %path.display(), keys = store.len(), "keystore loaded");
        Ok(store)
    }

    /// Encrypt every entry under `store_secret` and render the keystore JSON.
    pub fn to_json(&self, store_secret: &str) -> Result<String> {
        let keys = self
            .entries
            .iter()
            .map(|entry| encrypt_entry(entry, store_secret))
            .collect::<Result<Vec<_>>>()?;
        let file = KeyStoreFile {
            dn_name: self.dn_name.clone(),
            keys,
        };
        serde_json::to_string_pretty(&file)
            .map_err(|e| Error::KeyLoad(format!("cannot serialize keystore: {e}")))
    }

    pub fn dn_name(&self) -> Option<&str> {
        self.dn_name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, kid: &str) -> Option<&KeyEntry> {
        self.kid_index.get(kid).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.kid.as_str())
    }

    pub fn private_key(&self, kid: &str) -> Option<&PrivateKey> {
        self.entry(kid).map(|e| &e.private)
    }

    pub fn public_key(&self, kid: &str) -> Option<&PublicKey> {
        self.entry(kid).map(|e| &e.public)
    }

    /// DER bytes of the leaf certificate for `kid`, if the store carries one.
    pub fn certificate(&self, kid: &str) -> Result<Option<Vec<u8>>> {
        let Some(leaf) = self.entry(kid).and_then(|e| e.x5c.first()) else {
            return Ok(None);
        };
        STANDARD
            .decode(leaf)
            .map(Some)
            .map_err(|e| Error::KeyLoad(format!("invalid certificate for '{kid}': {e}")))
    }
}

fn decrypt_entry(stored: &StoredKey, secret: &str) -> Result<KeyEntry> {
    let alg: KeyAlgorithm = stored
        .alg
        .parse()
        .map_err(|_| Error::KeyLoad(format!("unknown algorithm '{}' for '{}'", stored.alg, stored.kid)))?;

    if let Some(key_use) = stored.key_use {
        if key_use != alg.key_use() {
            return Err(Error::KeyLoad(format!(
                "key '{}' is marked use={} but {alg} needs use={}",
                stored.kid,
                key_use.as_str(),
                alg.key_use().as_str()
            )));
        }
    }

    let pem = stored.private_key.as_str();
    let bad_key = |e: pkcs8::Error| {
        Error::KeyLoad(format!("cannot decrypt key '{}': {e}", stored.kid))
    };
    let private = match (alg.family(), alg.curve()) {
        (AlgorithmFamily::Rsa, _) => PrivateKey::Rsa(Box::new(
            RsaPrivateKey::from_pkcs8_encrypted_pem(pem, secret).map_err(bad_key)?,
        )),
        (AlgorithmFamily::Ec, Some(Curve::P256)) => {
            PrivateKey::P256(p256::SecretKey::from_pkcs8_encrypted_pem(pem, secret).map_err(bad_key)?)
        }
        (AlgorithmFamily::Ec, Some(Curve::P384)) => {
            PrivateKey::P384(p384::SecretKey::from_pkcs8_encrypted_pem(pem, secret).map_err(bad_key)?)
        }
        (AlgorithmFamily::Ec, Some(Curve::P521)) => {
            PrivateKey::P521(p521::SecretKey::from_pkcs8_encrypted_pem(pem, secret).map_err(bad_key)?)
        }
        _ => {
            return Err(Error::KeyLoad(format!(
                "{alg} keys do not belong in the keystore (kid '{}')",
                stored.kid
            )));
        }
    };

    Ok(KeyEntry::new(stored.kid.clone(), alg, private)?.with_certificates(stored.x5c.clone()))
}

fn encrypt_entry(entry: &KeyEntry, secret: &str) -> Result<StoredKey> {
    let pem = match &entry.private {
        PrivateKey::Rsa(key) => key.to_pkcs8_encrypted_pem(OsRng, secret, LineEnding::LF),
        PrivateKey::P256(key) => key.to_pkcs8_encrypted_pem(OsRng, secret, LineEnding::LF),
        PrivateKey::P384(key) => key.to_pkcs8_encrypted_pem(OsRng, secret, LineEnding::LF),
        PrivateKey::P521(key) => key.to_pkcs8_encrypted_pem(OsRng, secret, LineEnding::LF),
    }
    .map_err(|e| Error::KeyLoad(format!("cannot encrypt key '{}': {e}", entry.kid)))?;

    Ok(StoredKey {
        kid: entry.kid.clone(),
        alg: entry.alg.as_str().to_string(),
        key_use: Some(entry.key_use),
        private_key: pem.to_string(),
        x5c: entry.x5c.clone(),
    })
}
