//! Shared fixtures for unit tests. RSA generation is slow, so RSA keys are
//! generated once per test binary.

use std::sync::OnceLock;

use rsa::RsaPrivateKey;

use crate::jwa::{Curve, KeyEncryptionAlgorithm, SignatureAlgorithm};
use crate::keys::{KeyAlgorithm, KeyEntry, KeyRegistry, KeyStore, PrivateKey};

pub const RS256_KID: &str = "rs256-1";
pub const RS256_SECOND_KID: &str = "rs256-2";
pub const RS384_KID: &str = "rs384-1";
pub const RS512_KID: &str = "rs512-1";
pub const PS256_KID: &str = "ps256-1";
pub const PS384_KID: &str = "ps384-1";
pub const PS512_KID: &str = "ps512-1";
pub const ES256_KID: &str = "es256-1";
pub const ES384_KID: &str = "es384-1";
pub const ES512_KID: &str = "es512-1";
pub const RSA_OAEP_KID: &str = "rsa-oaep-1";
pub const RSA1_5_KID: &str = "rsa1_5-1";

pub const ISSUER: &str = "https://auth.example.com";
pub const CLIENT_SECRET: &str = "client-secret-with-enough-entropy-for-hs512-0123456789abcdef";

fn cached_rsa(slot: &'static OnceLock<RsaPrivateKey>) -> PrivateKey {
    let key = slot.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("RSA key generation")
    });
    PrivateKey::Rsa(Box::new(key.clone()))
}

/// Primary RSA test key.
pub fn rsa_key() -> PrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    cached_rsa(&KEY)
}

/// A second, distinct RSA key.
pub fn other_rsa_key() -> PrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    cached_rsa(&KEY)
}

fn entry(kid: &str, alg: KeyAlgorithm, key: PrivateKey) -> KeyEntry {
    KeyEntry::new(kid, alg, key).expect("valid test key")
}

/// In-memory keystore with one key for every asymmetric algorithm.
pub fn keystore() -> KeyStore {
    use KeyAlgorithm::{KeyEncryption, Signature};
    use SignatureAlgorithm::*;

    let entries = vec![
        entry(RS256_KID, Signature(Rs256), rsa_key()),
        entry(RS256_SECOND_KID, Signature(Rs256), other_rsa_key()),
        entry(RS384_KID, Signature(Rs384), rsa_key()),
        entry(RS512_KID, Signature(Rs512), rsa_key()),
        entry(PS256_KID, Signature(Ps256), rsa_key()),
        entry(PS384_KID, Signature(Ps384), rsa_key()),
        entry(PS512_KID, Signature(Ps512), rsa_key()),
        entry(ES256_KID, Signature(Es256), PrivateKey::generate_ec(Curve::P256)),
        entry(ES384_KID, Signature(Es384), PrivateKey::generate_ec(Curve::P384)),
        entry(ES512_KID, Signature(Es512), PrivateKey::generate_ec(Curve::P521)),
        entry(RSA_OAEP_KID, KeyEncryption(KeyEncryptionAlgorithm::RsaOaep), other_rsa_key()),
        entry(RSA1_5_KID, KeyEncryption(KeyEncryptionAlgorithm::Rsa1_5), other_rsa_key()),
    ];
    KeyStore::from_entries(Some("CN=Warden Test".to_string()), entries).expect("unique kids")
}

pub fn registry() -> KeyRegistry {
    KeyRegistry::new(keystore())
        .with_static_decryption_kid(RSA_OAEP_KID)
        .expect("static kid")
}

/// Kid registered for a signature algorithm in [`keystore`].
pub fn kid_for(alg: SignatureAlgorithm) -> Option<&'static str> {
    use SignatureAlgorithm::*;
    Some(match alg {
        Rs256 => RS256_KID,
        Rs384 => RS384_KID,
        Rs512 => RS512_KID,
        Ps256 => PS256_KID,
        Ps384 => PS384_KID,
        Ps512 => PS512_KID,
        Es256 => ES256_KID,
        Es384 => ES384_KID,
        Es512 => ES512_KID,
        None | Hs256 | Hs384 | Hs512 => return Option::None,
    })
}
