pub mod authorize;
pub mod binding;
pub mod claims;
pub mod clients;
pub mod config;
pub mod error;
pub mod introspection;
pub mod issuance;
pub mod jwa;
pub mod jwe;
pub mod jws;
pub mod jwt;
pub mod keys;
pub mod redirect;
pub mod request_object;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
