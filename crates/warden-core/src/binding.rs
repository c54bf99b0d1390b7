//! `Sec-Token-Binding` header parsing (RFC 8471, RFC 8473).
//!
//! Signatures on the binding are not checked here; the TLS terminator that
//! exports the keying material owns that. The core only derives the
//! confirmation hash that ties issued tokens to the binding.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::jwt;

pub const HEADER_NAME: &str = "sec-token-binding";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBindingType {
    Provided,
    Referred,
    Other(u8),
}

impl From<u8> for TokenBindingType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Provided,
            1 => Self::Referred,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub binding_type: TokenBindingType,
    pub key_parameters: u8,
    /// Encoded `TokenBindingID`: key parameters, length-prefixed public key.
    pub id: Vec<u8>,
    pub signature: Vec<u8>,
}

impl TokenBinding {
    /// base64url(SHA-256(TokenBindingID)).
    pub fn id_hash(&self) -> String {
        jwt::b64_encode(Sha256::digest(&self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBindingMessage {
    pub bindings: Vec<TokenBinding>,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(Error::InvalidTokenBinding("truncated message".to_string()));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<usize> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
    }

    fn vec16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()?;
        self.take(len)
    }
}

impl TokenBindingMessage {
    /// Decode the base64url header value.
    pub fn parse(header: &str) -> Result<Self> {
        let bytes = jwt::b64_decode(header.trim())
            .map_err(|_| Error::InvalidTokenBinding("header is not base64url".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut outer = Reader { bytes };
        let mut reader = Reader { bytes: outer.vec16()? };
        if !outer.bytes.is_empty() {
            return Err(Error::InvalidTokenBinding("trailing bytes".to_string()));
        }

        let mut bindings = Vec::new();
        while !reader.bytes.is_empty() {
            let binding_type = TokenBindingType::from(reader.u8()?);
            let id_start = reader.bytes;
            let key_parameters = reader.u8()?;
            let key = reader.vec16()?;
            if key.is_empty() {
                return Err(Error::InvalidTokenBinding("empty public key".to_string()));
            }
            let id = id_start[..3 + key.len()].to_vec();
            let signature = reader.vec16()?.to_vec();
            let _extensions = reader.vec16()?;
            bindings.push(TokenBinding {
                binding_type,
                key_parameters,
                id,
                signature,
            });
        }
        if bindings.is_empty() {
            return Err(Error::InvalidTokenBinding("no token bindings".to_string()));
        }
        Ok(Self { bindings })
    }

    pub fn provided(&self) -> Option<&TokenBinding> {
        self.bindings
            .iter()
            .find(|b| b.binding_type == TokenBindingType::Provided)
    }

    pub fn referred(&self) -> Option<&TokenBinding> {
        self.bindings
            .iter()
            .find(|b| b.binding_type == TokenBindingType::Referred)
    }
}

/// Confirmation hash for the provided binding in a `Sec-Token-Binding`
/// header value.
pub fn confirmation_hash(header: &str) -> Result<String> {
    let message = TokenBindingMessage::parse(header)?;
    message
        .provided()
        .map(TokenBinding::id_hash)
        .ok_or_else(|| Error::InvalidTokenBinding("no provided token binding".to_string()))
}

#[cfg(test)]
pub(crate) fn encode_message(bindings: &[(u8, u8, &[u8], &[u8])]) -> String {
    let mut body = Vec::new();
    for (binding_type, key_parameters, key, signature) in bindings {
        body.push(*binding_type);
        body.push(*key_parameters);
        body.extend_from_slice(&(key.len() as u16).to_be_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        body.extend_from_slice(signature);
        body.extend_from_slice(&0u16.to_be_bytes());
    }
    let mut message = (body.len() as u16).to_be_bytes().to_vec();
    message.extend_from_slice(&body);
    jwt::b64_encode(message)
}
