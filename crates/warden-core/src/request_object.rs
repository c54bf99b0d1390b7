//! Authorization request objects (OIDC Core §6): the `request` parameter
//! and documents fetched from `request_uri`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::claims::{self, ClaimsRequest, OpeningKeys};
use crate::clients::Client;
use crate::config::RequestObjectConfig;
use crate::error::{Error, Result};
use crate::jwa::SignatureAlgorithm;
use crate::jwt::{self, ClaimSet};
use crate::keys::KeyRegistry;
use crate::redirect::PatternList;

/// Window around now for `exp`/`nbf` under strict lifetime checking.
const MAX_LIFETIME_SECS: i64 = 3600;

/// A decoded, verified request object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestObject {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
    pub id_token_hint: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub max_age: Option<u64>,
    pub acr_values: Option<String>,
    pub iss: Option<String>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    pub jti: Option<String>,
    #[serde(default, rename = "claims")]
    pub claims_request: ClaimsRequest,
    /// Signature algorithm of the (inner) JWS; `None` for a plain JWE.
    #[serde(skip)]
    pub signature_alg: Option<SignatureAlgorithm>,
    #[serde(skip)]
    pub encrypted: bool,
}

impl RequestObject {
    fn from_claims(claims: ClaimSet) -> Result<Self> {
        serde_json::from_value(Value::Object(claims))
            .map_err(|e| Error::InvalidRequestObject(format!("invalid claims: {e}")))
    }

    /// `max_age` at the top level, else inside the `id_token` claim group.
    pub fn effective_max_age(&self) -> Option<u64> {
        self.max_age.or_else(|| {
            self.claims_request
                .id_token
                .get("max_age")
                .and_then(Value::as_u64)
        })
    }

    pub fn acr_values(&self) -> Vec<String> {
        self.acr_values
            .as_deref()
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Retrieves a request object by reference.
#[async_trait]
pub trait RequestUriFetcher: Send + Sync {
    async fn fetch(&self, uri: &Url) -> Result<String>;
}

/// Fetches `request_uri` documents over HTTP(S). Redirects are not followed.
#[derive(Debug, Clone)]
pub struct HttpRequestUriFetcher {
    http: reqwest::Client,
}

impl HttpRequestUriFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RequestUriFetcher for HttpRequestUriFetcher {
    async fn fetch(&self, uri: &Url) -> Result<String> {
        let mut target = uri.clone();
        target.set_fragment(None);
        let resp = self
            .http
            .get(target)
            .send()
            .await
            .map_err(|e| Error::InvalidRequestUri(format!("fetch failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::InvalidRequestUri(format!(
                "request_uri returned HTTP {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|e| Error::InvalidRequestUri(format!("cannot read body: {e}")))
    }
}

/// Decodes request objects for one server configuration.
pub struct RequestObjectDecoder<'a> {
    pub registry: &'a KeyRegistry,
    pub config: &'a RequestObjectConfig,
    pub reject_none_alg: bool,
}

impl RequestObjectDecoder<'_> {
    /// Decrypt and verify `request` on behalf of `client`.
    pub fn decode(&self, request: &str, client: &Client) -> Result<RequestObject> {
        let request = request.trim();
        if request.is_empty() {
            return Err(Error::InvalidRequestObject("empty request object".to_string()));
        }
        let segments = request.split('.').count();
        if segments != 3 && segments != 5 {
            return Err(Error::MalformedToken(format!(
                "request object has {segments} segments"
            )));
        }
        if self.config.require_encryption && segments != 5 {
            return Err(Error::InvalidRequestObject("request object must be encrypted".to_string()));
        }

        let opened = claims::open(
            request,
            OpeningKeys {
                registry: self.registry,
                jwks: client.jwks.as_ref(),
                shared_secret: client.secret_bytes(),
            },
        )
        .map_err(|e| match e {
            Error::MalformedToken(_) => e,
            other => Error::InvalidRequestObject(other.to_string()),
        })?;

        if let Some(alg) = opened.signature_alg {
            self.check_alg(alg, client)?;
            if !opened.signature_valid {
                return Err(Error::InvalidRequestObject("signature verification failed".to_string()));
            }
        }

        let mut object = RequestObject::from_claims(opened.claims)?;
        object.signature_alg = opened.signature_alg;
        object.encrypted = opened.encrypted;
        self.check_lifetime(&object)?;

        tracing::debug!(
            client_id = %client.client_id,
            alg = ?object.signature_alg,
            encrypted = object.encrypted,
            "request object decoded"
        );
        Ok(object)
    }

    fn check_alg(&self, alg: SignatureAlgorithm, client: &Client) -> Result<()> {
        if let Some(registered) = client.request_object_signing_alg
            && registered != alg
        {
            return Err(Error::InvalidRequestObject(format!(
                "client registered {registered}, request object uses {alg}"
            )));
        }
        if alg == SignatureAlgorithm::None
            && self.reject_none_alg
            && client.request_object_signing_alg.is_none()
        {
            return Err(Error::InvalidRequestObject("unsigned request objects are not accepted".to_string()));
        }
        Ok(())
    }

    fn check_lifetime(&self, object: &RequestObject) -> Result<()> {
        let now = Utc::now().timestamp();
        if object.exp.is_some_and(|exp| exp <= now) {
            return Err(Error::InvalidRequestObject("request object expired".to_string()));
        }
        if !self.config.strict_lifetime {
            return Ok(());
        }
        let nbf = object
            .nbf
            .filter(|nbf| *nbf > 0)
            .ok_or_else(|| Error::InvalidRequestObject("nbf claim is not set".to_string()))?;
        if now - nbf > MAX_LIFETIME_SECS {
            return Err(Error::InvalidRequestObject("nbf is more than 60 minutes in the past".to_string()));
        }
        let exp = object
            .exp
            .ok_or_else(|| Error::InvalidRequestObject("exp claim is not set".to_string()))?;
        if exp - now > MAX_LIFETIME_SECS {
            return Err(Error::InvalidRequestObject("exp is more than 60 minutes in the future".to_string()));
        }
        Ok(())
    }

    /// Check `request_uri` against the client and the block list, fetch it,
    /// and verify the fragment hash when enabled.
    pub async fn fetch(
        &self,
        request_uri: &str,
        client: &Client,
        fetcher: &dyn RequestUriFetcher,
    ) -> Result<String> {
        let uri = Url::parse(request_uri)
            .map_err(|_| Error::InvalidRequestUri("not an absolute URI".to_string()))?;

        if !client.request_uris.is_empty()
            && !client
                .request_uris
                .iter()
                .any(|registered| same_without_fragment(registered, &uri))
        {
            return Err(Error::InvalidRequestUri("not registered for client".to_string()));
        }

        let block_list = PatternList::new(&self.config.request_uri_block_list)?;
        if block_list.is_listed(request_uri) {
            tracing::warn!(client_id = %client.client_id, request_uri, "request_uri is block-listed");
            return Err(Error::InvalidRequestUri("request_uri is forbidden".to_string()));
        }

        let body = fetcher.fetch(&uri).await?;

        if self.config.request_uri_hash_verification
            && let Some(fragment) = uri.fragment().filter(|f| !f.is_empty())
        {
            let hash = jwt::b64_encode(Sha256::digest(body.trim().as_bytes()));
            if hash != fragment {
                return Err(Error::InvalidRequestUri("hash does not match request_uri fragment".to_string()));
            }
        }
        Ok(body)
    }
}

fn same_without_fragment(registered: &str, uri: &Url) -> bool {
    let Ok(mut registered) = Url::parse(registered) else {
        return false;
    };
    let mut uri = uri.clone();
    registered.set_fragment(None);
    uri.set_fragment(None);
    registered == uri
}

#[cfg(test)]
pub(crate) struct StaticFetcher(pub std::collections::HashMap<String, String>);

#[cfg(test)]
#[async_trait]
impl RequestUriFetcher for StaticFetcher {
    async fn fetch(&self, uri: &Url) -> Result<String> {
        let mut target = uri.clone();
        target.set_fragment(None);
        self.0
            .get(target.as_str())
            .cloned()
            .ok_or_else(|| Error::InvalidRequestUri("not found".to_string()))
    }
}
