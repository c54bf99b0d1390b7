//! Content encryption (RFC 7518 §5).

use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::jwa::{ContentEncryptionAlgorithm, HashAlg};

const GCM_TAG_LEN: usize = 16;

/// Output of one content encryption.
#[derive(Debug)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

pub trait ContentCipher: Send + Sync {
    fn encrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Sealed>;

    /// Any failure, including a bad tag, is [`Error::Decryption`].
    fn decrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8], tag: &[u8])
        -> Result<Vec<u8>>;
}

struct AesGcm {
    key_len: usize,
}

/// AES-CBC with HMAC-SHA-2. The CEK is the MAC key followed by the
/// encryption key, each half the CEK length.
struct AesCbcHmac {
    key_len: usize,
    hash: HashAlg,
}

static A128GCM: AesGcm = AesGcm { key_len: 16 };
static A256GCM: AesGcm = AesGcm { key_len: 32 };
static A128CBC_HS256: AesCbcHmac = AesCbcHmac { key_len: 16, hash: HashAlg::Sha256 };
static A256CBC_HS512: AesCbcHmac = AesCbcHmac { key_len: 32, hash: HashAlg::Sha512 };

impl ContentEncryptionAlgorithm {
    pub fn cipher(self) -> &'static dyn ContentCipher {
        match self {
            Self::A128Gcm => &A128GCM,
            Self::A256Gcm => &A256GCM,
            Self::A128CbcHs256 => &A128CBC_HS256,
            Self::A256CbcHs512 => &A256CBC_HS512,
        }
    }
}

fn check_key(cek: &[u8], expected: usize) -> Result<()> {
    if cek.len() != expected {
        return Err(Error::KeySize { expected, actual: cek.len() });
    }
    Ok(())
}

fn gcm_seal<C: Aead + KeyInit>(cek: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(cek).map_err(|e| Error::Encryption(format!("AES-GCM key: {e}")))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), Payload { msg, aad })
        .map_err(|_| Error::Encryption("AES-GCM encryption failed".to_string()))
}

fn gcm_open<C: Aead + KeyInit>(cek: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(cek).map_err(|_| Error::Decryption)?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), Payload { msg, aad })
        .map_err(|_| Error::Decryption)
}

impl ContentCipher for AesGcm {
    fn encrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Sealed> {
        check_key(cek, self.key_len)?;
        if iv.len() != 12 {
            return Err(Error::Encryption(format!("AES-GCM needs a 96-bit IV, got {} bytes", iv.len())));
        }
        let mut ciphertext = match self.key_len {
            16 => gcm_seal::<Aes128Gcm>(cek, iv, aad, plaintext)?,
            _ => gcm_seal::<Aes256Gcm>(cek, iv, aad, plaintext)?,
        };
        let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_LEN);
        Ok(Sealed { ciphertext, tag })
    }

    fn decrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        check_key(cek, self.key_len)?;
        if iv.len() != 12 || tag.len() != GCM_TAG_LEN {
            return Err(Error::Decryption);
        }
        let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        match self.key_len {
            16 => gcm_open::<Aes128Gcm>(cek, iv, aad, &sealed),
            _ => gcm_open::<Aes256Gcm>(cek, iv, aad, &sealed),
        }
    }
}

impl AesCbcHmac {
    /// Truncated HMAC over AAD || IV || ciphertext || AL, AL being the AAD
    /// length in bits as a 64-bit big-endian integer.
    fn tag(&self, mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let al = ((aad.len() as u64) * 8).to_be_bytes();
        let mut mac = self.hash.hmac(mac_key, &[aad, iv, ciphertext, &al])?;
        mac.truncate(self.key_len);
        Ok(mac)
    }
}

impl ContentCipher for AesCbcHmac {
    fn encrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Sealed> {
        check_key(cek, 2 * self.key_len)?;
        let (mac_key, enc_key) = cek.split_at(self.key_len);
        let invalid = |e: cbc::cipher::InvalidLength| Error::Encryption(format!("AES-CBC: {e}"));
        let ciphertext = match self.key_len {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        let tag = self.tag(mac_key, aad, iv, &ciphertext)?;
        Ok(Sealed { ciphertext, tag })
    }

    fn decrypt(&self, cek: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        check_key(cek, 2 * self.key_len)?;
        let (mac_key, enc_key) = cek.split_at(self.key_len);
        let expected = self.tag(mac_key, aad, iv, ciphertext).map_err(|_| Error::Decryption)?;
        if !bool::from(expected.ct_eq(tag)) {
            return Err(Error::Decryption);
        }
        let plaintext = match self.key_len {
            16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
                .map_err(|_| Error::Decryption)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
                .map_err(|_| Error::Decryption)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plaintext.map_err(|_| Error::Decryption)
    }
}
