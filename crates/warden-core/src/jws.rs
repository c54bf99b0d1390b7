//! JWS signing and verification (RFC 7515 / RFC 7518 §3).
//!
//! Each [`SignatureAlgorithm`] maps to a static [`JwsScheme`]. Verification
//! returns `Ok(false)` for a signature that does not check out; `Err` is kept
//! for keys that cannot be resolved or do not fit the algorithm.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Sha256, Sha384, Sha512};
use signature::{Signer, Verifier};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::jwa::{Curve, HashAlg, SignatureAlgorithm};
use crate::jwt::{self, Header, Jws};
use crate::keys::{Jwks, KeyEntry, KeyRegistry, PrivateKey, PublicKey, VerificationKey};

/// Key material for one signing call.
#[derive(Debug, Clone, Copy)]
pub enum SigningKey<'a> {
    Unsigned,
    Secret(&'a [u8]),
    Private(&'a PrivateKey),
}

impl<'a> From<&'a KeyEntry> for SigningKey<'a> {
    fn from(entry: &'a KeyEntry) -> Self {
        Self::Private(&entry.private)
    }
}

pub trait JwsScheme: Send + Sync {
    fn sign(&self, signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>>;

    fn verify(
        &self,
        signing_input: &[u8],
        signature: &[u8],
        key: &VerificationKey<'_>,
    ) -> Result<bool>;
}

struct NoneScheme;
struct HmacScheme(HashAlg);
struct RsaPkcs1Scheme(HashAlg);
struct RsaPssScheme(HashAlg);
struct EcdsaScheme(Curve);

static NONE: NoneScheme = NoneScheme;
static HS256: HmacScheme = HmacScheme(HashAlg::Sha256);
static HS384: HmacScheme = HmacScheme(HashAlg::Sha384);
static HS512: HmacScheme = HmacScheme(HashAlg::Sha512);
static RS256: RsaPkcs1Scheme = RsaPkcs1Scheme(HashAlg::Sha256);
static RS384: RsaPkcs1Scheme = RsaPkcs1Scheme(HashAlg::Sha384);
static RS512: RsaPkcs1Scheme = RsaPkcs1Scheme(HashAlg::Sha512);
static PS256: RsaPssScheme = RsaPssScheme(HashAlg::Sha256);
static PS384: RsaPssScheme = RsaPssScheme(HashAlg::Sha384);
static PS512: RsaPssScheme = RsaPssScheme(HashAlg::Sha512);
static ES256: EcdsaScheme = EcdsaScheme(Curve::P256);
static ES384: EcdsaScheme = EcdsaScheme(Curve::P384);
static ES512: EcdsaScheme = EcdsaScheme(Curve::P521);

impl SignatureAlgorithm {
    pub fn scheme(self) -> &'static dyn JwsScheme {
        match self {
            Self::None => &NONE,
            Self::Hs256 => &HS256,
            Self::Hs384 => &HS384,
            Self::Hs512 => &HS512,
            Self::Rs256 => &RS256,
            Self::Rs384 => &RS384,
            Self::Rs512 => &RS512,
            Self::Ps256 => &PS256,
            Self::Ps384 => &PS384,
            Self::Ps512 => &PS512,
            Self::Es256 => &ES256,
            Self::Es384 => &ES384,
            Self::Es512 => &ES512,
        }
    }
}

fn wrong_signing_key(expected: &str) -> Error {
    Error::Signing(format!("{expected} key required"))
}

fn wrong_verification_key(expected: &str) -> Error {
    Error::KeyResolution(format!("{expected} key required"))
}

impl JwsScheme for NoneScheme {
    fn sign(&self, _signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>> {
        match key {
            SigningKey::Unsigned => Ok(Vec::new()),
            _ => Err(Error::Signing("alg none takes no key".to_string())),
        }
    }

    fn verify(&self, _: &[u8], signature: &[u8], key: &VerificationKey<'_>) -> Result<bool> {
        match key {
            VerificationKey::Unsigned => Ok(signature.is_empty()),
            _ => Err(wrong_verification_key("no")),
        }
    }
}

impl JwsScheme for HmacScheme {
    fn sign(&self, signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>> {
        match key {
            SigningKey::Secret(secret) => self.0.hmac(secret, &[signing_input]),
            _ => Err(wrong_signing_key("shared secret")),
        }
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8], key: &VerificationKey<'_>) -> Result<bool> {
        let VerificationKey::Secret(secret) = key else {
            return Err(wrong_verification_key("shared secret"));
        };
        let expected = self.0.hmac(secret, &[signing_input])?;
        Ok(expected.ct_eq(signature).into())
    }
}

fn pkcs1_padding(hash: HashAlg) -> Pkcs1v15Sign {
    match hash {
        HashAlg::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlg::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlg::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

fn pss_padding(hash: HashAlg) -> Pss {
    match hash {
        HashAlg::Sha256 => Pss::new::<Sha256>(),
        HashAlg::Sha384 => Pss::new::<Sha384>(),
        HashAlg::Sha512 => Pss::new::<Sha512>(),
    }
}

fn rsa_signing_key<'a>(key: SigningKey<'a>) -> Result<&'a RsaPrivateKey> {
    match key {
        SigningKey::Private(private) => private.as_rsa().ok_or_else(|| wrong_signing_key("RSA")),
        _ => Err(wrong_signing_key("RSA")),
    }
}

fn rsa_verification_key<'a>(key: &'a VerificationKey<'_>) -> Result<&'a RsaPublicKey> {
    match key {
        VerificationKey::Public(public) => public.as_rsa().ok_or_else(|| wrong_verification_key("RSA")),
        _ => Err(wrong_verification_key("RSA")),
    }
}

impl JwsScheme for RsaPkcs1Scheme {
    fn sign(&self, signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>> {
        let private = rsa_signing_key(key)?;
        let digest = self.0.digest(signing_input);
        private
            .sign(pkcs1_padding(self.0), &digest)
            .map_err(|e| Error::Signing(format!("RSA signing failed: {e}")))
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8], key: &VerificationKey<'_>) -> Result<bool> {
        let public = rsa_verification_key(key)?;
        let digest = self.0.digest(signing_input);
        Ok(public.verify(pkcs1_padding(self.0), &digest, signature).is_ok())
    }
}

impl JwsScheme for RsaPssScheme {
    fn sign(&self, signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>> {
        let private = rsa_signing_key(key)?;
        let digest = self.0.digest(signing_input);
        private
            .sign_with_rng(&mut OsRng, pss_padding(self.0), &digest)
            .map_err(|e| Error::Signing(format!("RSA-PSS signing failed: {e}")))
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8], key: &VerificationKey<'_>) -> Result<bool> {
        let public = rsa_verification_key(key)?;
        let digest = self.0.digest(signing_input);
        Ok(public.verify(pss_padding(self.0), &digest, signature).is_ok())
    }
}

impl JwsScheme for EcdsaScheme {
    // Signatures are the fixed-width R || S concatenation.
    fn sign(&self, signing_input: &[u8], key: SigningKey<'_>) -> Result<Vec<u8>> {
        let SigningKey::Private(private) = key else {
            return Err(wrong_signing_key(self.0.as_str()));
        };
        match (self.0, private) {
            (Curve::P256, PrivateKey::P256(secret)) => {
                let signer = p256::ecdsa::SigningKey::from(secret);
                let sig: p256::ecdsa::Signature = signer.sign(signing_input);
                Ok(sig.to_bytes().to_vec())
            }
            (Curve::P384, PrivateKey::P384(secret)) => {
                let signer = p384::ecdsa::SigningKey::from(secret);
                let sig: p384::ecdsa::Signature = signer.sign(signing_input);
                Ok(sig.to_bytes().to_vec())
            }
            (Curve::P521, PrivateKey::P521(secret)) => {
                let signer = p521::ecdsa::SigningKey::from_slice(&secret.to_bytes())
                    .map_err(|e| Error::Signing(format!("P-521 key: {e}")))?;
                let sig: p521::ecdsa::Signature = signer.sign(signing_input);
                Ok(sig.to_bytes().to_vec())
            }
            _ => Err(wrong_signing_key(self.0.as_str())),
        }
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8], key: &VerificationKey<'_>) -> Result<bool> {
        let VerificationKey::Public(public) = key else {
            return Err(wrong_verification_key(self.0.as_str()));
        };
        if signature.len() != 2 * self.0.coordinate_len() {
            return Ok(false);
        }
        match (self.0, &**public) {
            (Curve::P256, PublicKey::P256(pk)) => {
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let verifier = p256::ecdsa::VerifyingKey::from(pk);
                Ok(verifier.verify(signing_input, &sig).is_ok())
            }
            (Curve::P384, PublicKey::P384(pk)) => {
                let Ok(sig) = p384::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let verifier = p384::ecdsa::VerifyingKey::from(pk);
                Ok(verifier.verify(signing_input, &sig).is_ok())
            }
            (Curve::P521, PublicKey::P521(pk)) => {
                let Ok(sig) = p521::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let point = pk.to_encoded_point(false);
                let verifier = p521::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes())
                    .map_err(|_| wrong_verification_key("P-521"))?;
                Ok(verifier.verify(signing_input, &sig).is_ok())
            }
            _ => Err(wrong_verification_key(self.0.as_str())),
        }
    }
}

/// Sign `signing_input` with `alg`.
pub fn sign(signing_input: &[u8], key: SigningKey<'_>, alg: SignatureAlgorithm) -> Result<Vec<u8>> {
    alg.scheme().sign(signing_input, key)
}

/// Verify a signature, resolving the key through the registry.
pub fn verify(
    registry: &KeyRegistry,
    signing_input: &[u8],
    signature: &[u8],
    kid: Option<&str>,
    jwks: Option<&Jwks>,
    shared_secret: Option<&[u8]>,
    alg: SignatureAlgorithm,
) -> Result<bool> {
    let key = registry.resolve_verification_key(kid, jwks, shared_secret, alg)?;
    alg.scheme().verify(signing_input, signature, &key)
}

/// Serialize `claims` and sign them into a compact JWS.
pub fn sign_token<T: Serialize>(
    claims: &T,
    alg: SignatureAlgorithm,
    key: SigningKey<'_>,
    kid: Option<&str>,
) -> Result<String> {
    let mut header = Header::jws(alg);
    header.kid = kid.map(str::to_string);
    jwt::encode(&header, claims, |input| sign(input, key, alg))
}

/// Check a parsed JWS using the algorithm and kid named in its header.
pub fn verify_token(
    registry: &KeyRegistry,
    token: &Jws,
    jwks: Option<&Jwks>,
    shared_secret: Option<&[u8]>,
) -> Result<bool> {
    let alg = token.header.signature_alg()?;
    verify(
        registry,
        token.signing_input.as_bytes(),
        &token.signature,
        token.header.kid.as_deref(),
        jwks,
        shared_secret,
        alg,
    )
}
