//! Key management: wrapping the content-encryption key (RFC 7518 §4).

use aes_kw::{KekAes128, KekAes256};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::jwa::KeyEncryptionAlgorithm;

/// Key material for wrapping or unwrapping a CEK.
#[derive(Debug, Clone, Copy)]
pub enum JweKey<'a> {
    RsaPublic(&'a RsaPublicKey),
    RsaPrivate(&'a RsaPrivateKey),
    /// Raw AES key-encryption key; its length must match the algorithm.
    Aes(&'a [u8]),
    /// Client secret from which the AES key-encryption key is derived.
    SharedSecret(&'a [u8]),
}

pub trait KeyManagement: Send + Sync {
    fn wrap(&self, cek: &[u8], key: JweKey<'_>) -> Result<Vec<u8>>;

    /// Recover a CEK of `cek_len` bytes.
    fn unwrap(&self, encrypted_key: &[u8], key: JweKey<'_>, cek_len: usize)
        -> Result<Zeroizing<Vec<u8>>>;
}

struct RsaPkcs1;
struct RsaOaep;
struct AesKeyWrap {
    kek_len: usize,
}

static RSA1_5: RsaPkcs1 = RsaPkcs1;
static RSA_OAEP: RsaOaep = RsaOaep;
static A128KW: AesKeyWrap = AesKeyWrap { kek_len: 16 };
static A256KW: AesKeyWrap = AesKeyWrap { kek_len: 32 };

impl KeyEncryptionAlgorithm {
    pub fn key_management(self) -> &'static dyn KeyManagement {
        match self {
            Self::Rsa1_5 => &RSA1_5,
            Self::RsaOaep => &RSA_OAEP,
            Self::A128Kw => &A128KW,
            Self::A256Kw => &A256KW,
        }
    }
}

fn rsa_public(key: JweKey<'_>) -> Result<RsaPublicKey> {
    match key {
        JweKey::RsaPublic(public) => Ok(public.clone()),
        JweKey::RsaPrivate(private) => Ok(private.to_public_key()),
        _ => Err(Error::KeyResolution("RSA key management needs an RSA key".to_string())),
    }
}

fn rsa_private(key: JweKey<'_>) -> Result<&RsaPrivateKey> {
    match key {
        JweKey::RsaPrivate(private) => Ok(private),
        _ => Err(Error::KeyResolution("RSA key management needs an RSA private key".to_string())),
    }
}

fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    bytes
}

impl KeyManagement for RsaPkcs1 {
    fn wrap(&self, cek: &[u8], key: JweKey<'_>) -> Result<Vec<u8>> {
        rsa_public(key)?
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, cek)
            .map_err(|e| Error::Encryption(format!("RSA1_5: {e}")))
    }

    // A failed unwrap yields a random CEK so the failure only shows at the
    // tag check (RFC 7516 §11.5).
    fn unwrap(&self, encrypted_key: &[u8], key: JweKey<'_>, cek_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let private = rsa_private(key)?;
        let fallback = random_bytes(cek_len);
        match private.decrypt(Pkcs1v15Encrypt, encrypted_key) {
            Ok(cek) if cek.len() == cek_len => Ok(Zeroizing::new(cek)),
            _ => Ok(fallback),
        }
    }
}

impl KeyManagement for RsaOaep {
    fn wrap(&self, cek: &[u8], key: JweKey<'_>) -> Result<Vec<u8>> {
        rsa_public(key)?
            .encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), cek)
            .map_err(|e| Error::Encryption(format!("RSA-OAEP: {e}")))
    }

    fn unwrap(&self, encrypted_key: &[u8], key: JweKey<'_>, cek_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let private = rsa_private(key)?;
        let cek = private
            .decrypt(Oaep::new::<sha1::Sha1>(), encrypted_key)
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption)?;
        if cek.len() != cek_len {
            return Err(Error::Decryption);
        }
        Ok(cek)
    }
}

impl AesKeyWrap {
    fn kek(&self, key: JweKey<'_>) -> Result<Zeroizing<Vec<u8>>> {
        match key {
            JweKey::Aes(raw) if raw.len() == self.kek_len => Ok(Zeroizing::new(raw.to_vec())),
            JweKey::Aes(raw) => Err(Error::KeySize { expected: self.kek_len, actual: raw.len() }),
            JweKey::SharedSecret(secret) => Ok(derive_kek(secret, self.kek_len)),
            _ => Err(Error::KeyResolution("AES key wrap needs a symmetric key".to_string())),
        }
    }
}

/// A secret of exactly `len` bytes is the key; any other secret is hashed
/// with SHA-256 and truncated.
pub fn derive_kek(secret: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    if secret.len() == len {
        return Zeroizing::new(secret.to_vec());
    }
    let digest = Sha256::digest(secret);
    Zeroizing::new(digest[..len.min(digest.len())].to_vec())
}

impl KeyManagement for AesKeyWrap {
    fn wrap(&self, cek: &[u8], key: JweKey<'_>) -> Result<Vec<u8>> {
        let kek = self.kek(key)?;
        let wrapped = match self.kek_len {
            16 => KekAes128::try_from(kek.as_slice()).and_then(|k| k.wrap_vec(cek)),
            _ => KekAes256::try_from(kek.as_slice()).and_then(|k| k.wrap_vec(cek)),
        };
        wrapped.map_err(|e| Error::Encryption(format!("AES key wrap: {e}")))
    }

    fn unwrap(&self, encrypted_key: &[u8], key: JweKey<'_>, cek_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let kek = self.kek(key)?;
        let cek = match self.kek_len {
            16 => KekAes128::try_from(kek.as_slice()).and_then(|k| k.unwrap_vec(encrypted_key)),
            _ => KekAes256::try_from(kek.as_slice()).and_then(|k| k.unwrap_vec(encrypted_key)),
        }
        .map(Zeroizing::new)
        .map_err(|_| Error::Decryption)?;
        if cek.len() != cek_len {
            return Err(Error::Decryption);
        }
        Ok(cek)
    }
}
