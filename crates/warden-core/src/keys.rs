//! Key & algorithm registry.
//!
//! The registry owns every key the server uses for the lifetime of the
//! process. It is built once at startup from the keystore and shared behind an
//! `Arc`; signers and ciphers only borrow keys for the duration of one call.

mod jwks;
mod store;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::config::KeyStoreConfig;
use crate::error::{Error, Result};
use crate::jwa::{AlgorithmFamily, Curve, KeyEncryptionAlgorithm, SignatureAlgorithm};

pub use jwks::{Jwk, Jwks};
pub use store::{KeyAlgorithm, KeyEntry, KeyStore, KeyUse, StoredKey};

/// Symmetric secret (client secret bytes or a raw AES key). Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey({} bytes)", self.0.len())
    }
}

#[derive(Clone)]
pub enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(key) => write!(f, "PrivateKey::Rsa({} bits)", key.size() * 8),
            Self::P256(_) => f.write_str("PrivateKey::P256"),
            Self::P384(_) => f.write_str("PrivateKey::P384"),
            Self::P521(_) => f.write_str("PrivateKey::P521"),
        }
    }
}

impl PrivateKey {
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyLoad(format!("RSA key generation failed: {e}")))?;
        Ok(Self::Rsa(Box::new(key)))
    }

    pub fn generate_ec(curve: Curve) -> Self {
        match curve {
            Curve::P256 => Self::P256(p256::SecretKey::random(&mut OsRng)),
            Curve::P384 => Self::P384(p384::SecretKey::random(&mut OsRng)),
            Curve::P521 => Self::P521(p521::SecretKey::random(&mut OsRng)),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            Self::P256(key) => PublicKey::P256(key.public_key()),
            Self::P384(key) => PublicKey::P384(key.public_key()),
            Self::P521(key) => PublicKey::P521(key.public_key()),
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Self::Rsa(_) => AlgorithmFamily::Rsa,
            _ => AlgorithmFamily::Ec,
        }
    }

    pub fn curve(&self) -> Option<Curve> {
        match self {
            Self::Rsa(_) => None,
            Self::P256(_) => Some(Curve::P256),
            Self::P384(_) => Some(Curve::P384),
            Self::P521(_) => Some(Curve::P521),
        }
    }

    pub fn as_rsa(&self) -> Option<&RsaPrivateKey> {
        match self {
            Self::Rsa(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

/// JWK parameters for a single public key, varies by key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwkParams {
    Rsa {
        /// Base64url-encoded modulus
        n: String,
        /// Base64url-encoded exponent
        e: String,
    },
    Ec {
        crv: &'static str,
        /// Base64url-encoded x coordinate
        x: String,
        /// Base64url-encoded y coordinate
        y: String,
    },
}

impl PublicKey {
    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Self::Rsa(_) => AlgorithmFamily::Rsa,
            _ => AlgorithmFamily::Ec,
        }
    }

    pub fn curve(&self) -> Option<Curve> {
        match self {
            Self::Rsa(_) => None,
            Self::P256(_) => Some(Curve::P256),
            Self::P384(_) => Some(Curve::P384),
            Self::P521(_) => Some(Curve::P521),
        }
    }

    pub fn as_rsa(&self) -> Option<&RsaPublicKey> {
        match self {
            Self::Rsa(key) => Some(key),
            _ => None,
        }
    }

    /// Whether this key can verify signatures made with `alg`.
    pub fn supports(&self, alg: SignatureAlgorithm) -> bool {
        match alg.family() {
            AlgorithmFamily::Rsa => self.family() == AlgorithmFamily::Rsa,
            AlgorithmFamily::Ec => self.curve() == alg.curve(),
            _ => false,
        }
    }

    pub fn jwk_params(&self) -> JwkParams {
        match self {
            Self::Rsa(key) => JwkParams::Rsa {
                n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            },
            Self::P256(key) => {
                let point = key.to_encoded_point(false);
                ec_params(Curve::P256, point.x().map(|v| v.as_slice()), point.y().map(|v| v.as_slice()))
            }
            Self::P384(key) => {
                let point = key.to_encoded_point(false);
                ec_params(Curve::P384, point.x().map(|v| v.as_slice()), point.y().map(|v| v.as_slice()))
            }
            Self::P521(key) => {
                let point = key.to_encoded_point(false);
                ec_params(Curve::P521, point.x().map(|v| v.as_slice()), point.y().map(|v| v.as_slice()))
            }
        }
    }

    /// Build an EC public key from its affine coordinates.
    pub fn from_ec_coordinates(curve: Curve, x: &[u8], y: &[u8]) -> Result<Self> {
        let len = curve.coordinate_len();
        if x.len() > len || y.len() > len {
            return Err(Error::KeyResolution(format!(
                "{} coordinate longer than {len} bytes",
                curve.as_str()
            )));
        }
        // Uncompressed SEC1 point: 0x04 || X || Y, coordinates left-padded.
        let mut sec1 = Vec::with_capacity(1 + 2 * len);
        sec1.push(0x04);
        sec1.resize(1 + len - x.len(), 0);
        sec1.extend_from_slice(x);
        sec1.resize(1 + 2 * len - y.len(), 0);
        sec1.extend_from_slice(y);

        let invalid = |_| Error::KeyResolution(format!("invalid {} point", curve.as_str()));
        Ok(match curve {
            Curve::P256 => Self::P256(p256::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
            Curve::P384 => Self::P384(p384::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
            Curve::P521 => Self::P521(p521::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
        })
    }
}

fn ec_params(curve: Curve, x: Option<&[u8]>, y: Option<&[u8]>) -> JwkParams {
    JwkParams::Ec {
        crv: curve.as_str(),
        x: URL_SAFE_NO_PAD.encode(x.unwrap_or_default()),
        y: URL_SAFE_NO_PAD.encode(y.unwrap_or_default()),
    }
}

/// Key material resolved for a single verification.
#[derive(Debug, Clone)]
pub enum VerificationKey<'a> {
    Unsigned,
    Secret(&'a [u8]),
    Public(Cow<'a, PublicKey>),
}

/// Process-wide key registry.
pub struct KeyRegistry {
    store: KeyStore,
    default_kids: HashMap<SignatureAlgorithm, String>,
    static_decryption_kid: Option<String>,
    session_kid: Option<String>,
}

impl fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("kids", &self.store.kids().collect::<Vec<_>>())
            .field("default_kids", &self.default_kids)
            .finish()
    }
}

impl KeyRegistry {
    pub fn new(store: KeyStore) -> Self {
        Self {
            store,
            default_kids: HashMap::new(),
            static_decryption_kid: None,
            session_kid: None,
        }
    }

    /// Load the keystore named by the config and apply its kid overrides.
    pub fn from_config(config: &KeyStoreConfig) -> Result<Self> {
        let secret = config.secret.resolve()?;
        let store = KeyStore::load(&config.path, &secret, config.dn_name.as_deref())?;

        let mut registry = Self::new(store);
        for (alg, kid) in &config.default_kids {
            let alg: SignatureAlgorithm = alg.parse()?;
            registry = registry.with_default_kid(alg, kid)?;
        }
        if let Some(kid) = &config.static_decryption_kid {
            registry = registry.with_static_decryption_kid(kid)?;
        }
        if let Some(kid) = &config.session_kid {
            registry = registry.with_session_kid(kid)?;
        }
        Ok(registry)
    }

    /// Pin the key used when signing with `alg`.
    pub fn with_default_kid(mut self, alg: SignatureAlgorithm, kid: &str) -> Result<Self> {
        let entry = self.store.entry(kid).ok_or_else(|| {
            Error::Config(format!("default kid '{kid}' for {alg} is not in the keystore"))
        })?;
        if entry.alg != KeyAlgorithm::Signature(alg) {
            return Err(Error::Config(format!(
                "default kid '{kid}' is a {} key, not {alg}",
                entry.alg
            )));
        }
        self.default_kids.insert(alg, kid.to_string());
        Ok(self)
    }

    /// Fallback key for request objects whose `kid` names no keystore entry.
    pub fn with_static_decryption_kid(mut self, kid: &str) -> Result<Self> {
        let entry = self.store.entry(kid).ok_or_else(|| {
            Error::Config(format!("static decryption kid '{kid}' is not in the keystore"))
        })?;
        if entry.private.as_rsa().is_none() {
            return Err(Error::Config(format!(
                "static decryption kid '{kid}' must be an RSA key"
            )));
        }
        self.static_decryption_kid = Some(kid.to_string());
        Ok(self)
    }

    pub fn with_session_kid(mut self, kid: &str) -> Result<Self> {
        let entry = self.store.entry(kid).ok_or_else(|| {
            Error::Config(format!("session kid '{kid}' is not in the keystore"))
        })?;
        if !matches!(entry.alg, KeyAlgorithm::Signature(_)) {
            return Err(Error::Config(format!("session kid '{kid}' must be a signing key")));
        }
        self.session_kid = Some(kid.to_string());
        Ok(self)
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Key used to sign with `alg`: the pinned default, else the first
    /// signing entry registered for that algorithm.
    pub fn signing_key(&self, alg: SignatureAlgorithm) -> Result<&KeyEntry> {
        if let Some(entry) = self.default_kids.get(&alg).and_then(|kid| self.store.entry(kid)) {
            return Ok(entry);
        }
        self.store
            .entries()
            .find(|e| e.alg == KeyAlgorithm::Signature(alg))
            .ok_or_else(|| Error::KeyResolution(format!("no signing key for {alg}")))
    }

    /// Key used for session tokens handed out by the login UI.
    pub fn session_key(&self) -> Result<&KeyEntry> {
        match &self.session_kid {
            Some(kid) => self
                .store
                .entry(kid)
                .ok_or_else(|| Error::KeyResolution(format!("session kid '{kid}' not found"))),
            None => self
                .store
                .entries()
                .find(|e| matches!(e.alg, KeyAlgorithm::Signature(_)))
                .ok_or_else(|| Error::KeyResolution("no signing key in keystore".to_string())),
        }
    }

    /// RSA private key for decrypting an inbound JWE addressed to `kid`,
    /// falling back to the static decryption kid.
    pub fn decryption_key(&self, kid: Option<&str>) -> Result<&RsaPrivateKey> {
        let entry = kid
            .and_then(|kid| self.store.entry(kid))
            .or_else(|| {
                self.static_decryption_kid
                    .as_deref()
                    .and_then(|kid| self.store.entry(kid))
            })
            .ok_or_else(|| {
                Error::KeyResolution(format!(
                    "no decryption key for kid '{}'",
                    kid.unwrap_or("<none>")
                ))
            })?;
        entry.private.as_rsa().ok_or_else(|| {
            Error::KeyResolution(format!("key '{}' is not an RSA key", entry.kid))
        })
    }

    /// Resolve the key that verifies a signature made with `alg`.
    ///
    /// HMAC algorithms use the shared secret. Asymmetric algorithms require a
    /// key id, looked up in `jwks` when one is supplied, else in the keystore.
    pub fn resolve_verification_key<'a>(
        &'a self,
        kid: Option<&str>,
        jwks: Option<&Jwks>,
        shared_secret: Option<&'a [u8]>,
        alg: SignatureAlgorithm,
    ) -> Result<VerificationKey<'a>> {
        match alg.family() {
            AlgorithmFamily::None => Ok(VerificationKey::Unsigned),
            AlgorithmFamily::Hmac => shared_secret
                .map(VerificationKey::Secret)
                .ok_or_else(|| Error::KeyResolution(format!("{alg} requires a shared secret"))),
            _ => {
                let kid = kid
                    .ok_or_else(|| Error::KeyResolution(format!("{alg} requires a key id")))?;
                let key = match jwks {
                    Some(jwks) => Cow::Owned(jwks.public_key(kid)?),
                    None => {
                        let entry = self.store.entry(kid).ok_or_else(|| {
                            Error::KeyResolution(format!("kid '{kid}' not found"))
                        })?;
                        Cow::Borrowed(&entry.public)
                    }
                };
                if !key.supports(alg) {
                    return Err(Error::KeyResolution(format!(
                        "key '{kid}' cannot verify {alg}"
                    )));
                }
                Ok(VerificationKey::Public(key))
            }
        }
    }

    /// Signature algorithms the keystore can sign with, plus the HMAC family.
    pub fn signing_algorithms(&self) -> Vec<SignatureAlgorithm> {
        SignatureAlgorithm::ALL
            .into_iter()
            .filter(|alg| match alg.family() {
                AlgorithmFamily::Hmac => true,
                AlgorithmFamily::None | AlgorithmFamily::Aes => false,
                _ => self.signing_key(*alg).is_ok(),
            })
            .collect()
    }

    /// Public JWKS document for every keystore entry.
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.store.entries().map(Jwk::from_entry).collect(),
        }
    }
}

/// Create a keystore with one key each for RS256, PS256, ES256, ES384, ES512
/// and RSA-OAEP, and write it to `path` encrypted under `store_secret`.
/// Refuses to overwrite an existing file.
pub fn generate_keystore(path: &Path, store_secret: &str, dn_name: Option<&str>) -> Result<KeyStore> {
    if path.exists() {
        return Err(Error::KeyLoad(format!("{} already exists", path.display())));
    }

    let algorithms = [
        KeyAlgorithm::Signature(SignatureAlgorithm::Rs256),
        KeyAlgorithm::Signature(SignatureAlgorithm::Ps256),
        KeyAlgorithm::Signature(SignatureAlgorithm::Es256),
        KeyAlgorithm::Signature(SignatureAlgorithm::Es384),
        KeyAlgorithm::Signature(SignatureAlgorithm::Es512),
        KeyAlgorithm::KeyEncryption(KeyEncryptionAlgorithm::RsaOaep),
    ];
    let mut entries = Vec::with_capacity(algorithms.len());
    for alg in algorithms {
        let private = match alg.curve() {
            Some(curve) => PrivateKey::generate_ec(curve),
            None => PrivateKey::generate_rsa(2048)?,
        };
        let id = uuid::Uuid::new_v4().simple().to_string();
        let kid = format!("{}-{}", alg.as_str().to_ascii_lowercase(), &id[..8]);
        tracing::info!(kid = %kid, alg = %alg, "generated key");
        entries.push(KeyEntry::new(kid, alg, private)?);
    }

    let store = KeyStore::from_entries(dn_name.map(str::to_string), entries)?;
    std::fs::write(path, store.to_json(store_secret)?)
        .map_err(|e| Error::KeyLoad(format!("cannot write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), keys = store.len(), "keystore written");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn registry() -> KeyRegistry {
        KeyRegistry::new(test_support::keystore())
    }

    #[test]
    fn symmetric_key_debug_hides_material() {
        let key = SymmetricKey::new(b"super-secret".to_vec());
        assert_eq!(format!("{key:?}"), "SymmetricKey(12 bytes)");
        assert_eq!(key.as_bytes(), b"super-secret");
    }

    #[test]
    fn hmac_resolves_shared_secret() {
        let registry = registry();
        let key = registry
            .resolve_verification_key(None, None, Some(b"secret"), SignatureAlgorithm::Hs256)
            .unwrap();
        assert!(matches!(key, VerificationKey::Secret(b"secret")));
    }

    #[test]
    fn hmac_without_secret_fails() {
        let err = registry()
            .resolve_verification_key(None, None, None, SignatureAlgorithm::Hs384)
            .unwrap_err();
        assert!(matches!(err, Error::KeyResolution(_)));
    }

    #[test]
    fn asymmetric_requires_kid() {
        let err = registry()
            .resolve_verification_key(None, None, None, SignatureAlgorithm::Rs256)
            .unwrap_err();
        assert!(err.to_string().contains("requires a key id"), "got: {err}");
    }

    #[test]
    fn unknown_kid_fails_resolution() {
        let err = registry()
            .resolve_verification_key(Some("missing"), None, None, SignatureAlgorithm::Es256)
            .unwrap_err();
        assert!(matches!(err, Error::KeyResolution(_)));
    }

    #[test]
    fn keystore_kid_resolves_public_key() {
        let registry = registry();
        let key = registry
            .resolve_verification_key(Some(test_support::ES384_KID), None, None, SignatureAlgorithm::Es384)
            .unwrap();
        match key {
            VerificationKey::Public(pk) => assert_eq!(pk.curve(), Some(Curve::P384)),
            other => panic!("unexpected key: {other:?}"),
        }
    }

    #[test]
    fn wrong_curve_is_rejected() {
        let err = registry()
            .resolve_verification_key(Some(test_support::ES256_KID), None, None, SignatureAlgorithm::Es512)
            .unwrap_err();
        assert!(err.to_string().contains("cannot verify ES512"), "got: {err}");
    }

    #[test]
    fn jwks_takes_precedence_over_keystore() {
        let registry = registry();
        let client_key = PrivateKey::generate_ec(Curve::P256);
        let jwks = Jwks {
            keys: vec![Jwk::from_public_key(&client_key.public_key(), "client-1", KeyUse::Sig, Some("ES256"))],
        };
        let key = registry
            .resolve_verification_key(Some("client-1"), Some(&jwks), None, SignatureAlgorithm::Es256)
            .unwrap();
        assert!(matches!(key, VerificationKey::Public(Cow::Owned(_))));

        // A keystore kid is not visible through an injected JWKS.
        let err = registry
            .resolve_verification_key(Some(test_support::ES256_KID), Some(&jwks), None, SignatureAlgorithm::Es256)
            .unwrap_err();
        assert!(matches!(err, Error::KeyResolution(_)));
    }

    #[test]
    fn signing_key_prefers_pinned_default() {
        let registry = registry()
            .with_default_kid(SignatureAlgorithm::Rs256, test_support::RS256_SECOND_KID)
            .unwrap();
        assert_eq!(
            registry.signing_key(SignatureAlgorithm::Rs256).unwrap().kid,
            test_support::RS256_SECOND_KID
        );
    }

    #[test]
    fn default_kid_must_match_algorithm() {
        let err = registry()
            .with_default_kid(SignatureAlgorithm::Rs256, test_support::ES256_KID)
            .unwrap_err();
        assert!(err.to_string().contains("not RS256"), "got: {err}");
    }

    #[test]
    fn decryption_key_falls_back_to_static_kid() {
        let registry = registry()
            .with_static_decryption_kid(test_support::RSA_OAEP_KID)
            .unwrap();
        assert!(registry.decryption_key(Some("unknown")).is_ok());
        assert!(registry.decryption_key(None).is_ok());
        assert!(KeyRegistry::new(test_support::keystore()).decryption_key(None).is_err());
    }

    #[test]
    fn ec_coordinates_roundtrip_through_jwk_params() {
        for curve in [Curve::P256, Curve::P384, Curve::P521] {
            let public = PrivateKey::generate_ec(curve).public_key();
            let JwkParams::Ec { x, y, crv } = public.jwk_params() else {
                panic!("expected EC params");
            };
            assert_eq!(crv, curve.as_str());
            let x = URL_SAFE_NO_PAD.decode(x).unwrap();
            let y = URL_SAFE_NO_PAD.decode(y).unwrap();
            assert_eq!(x.len(), curve.coordinate_len());
            let rebuilt = PublicKey::from_ec_coordinates(curve, &x, &y).unwrap();
            assert_eq!(rebuilt, public);
        }
    }

    #[test]
    fn signing_algorithms_reflect_keystore() {
        let algs = registry().signing_algorithms();
        assert!(algs.contains(&SignatureAlgorithm::Hs256));
        assert!(algs.contains(&SignatureAlgorithm::Ps512));
        assert!(algs.contains(&SignatureAlgorithm::Es512));
        assert!(!algs.contains(&SignatureAlgorithm::None));
    }

    #[test]
    fn generated_keystore_loads_and_signs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let generated = generate_keystore(&path, "store-secret", Some("CN=warden")).unwrap();
        assert_eq!(generated.len(), 6);

        let loaded = KeyStore::load(&path, "store-secret", Some("CN=warden")).unwrap();
        let registry = KeyRegistry::new(loaded);
        for alg in [SignatureAlgorithm::Rs256, SignatureAlgorithm::Ps256, SignatureAlgorithm::Es512] {
            assert!(registry.signing_key(alg).is_ok(), "{alg}");
        }
        assert!(registry.decryption_key(None).is_err());

        let err = generate_keystore(&path, "store-secret", None).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
