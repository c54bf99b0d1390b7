//! The authorization endpoint state machine.
//!
//! An attempt starts `Requested` and ends `Granted` (tokens minted) or
//! `Denied` (redirect-style error). Unknown clients and redirect URIs that
//! fail registration or policy are never redirected to; they surface as
//! `Err` for the caller to render.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::binding;
use crate::claims::ClaimsRequest;
use crate::clients::{Client, ClientStore};
use crate::error::{Error, Result};
use crate::issuance::{Grant, IdTokenParams, TokenIssuer};
use crate::redirect::RedirectPolicy;
use crate::request_object::{RequestObject, RequestObjectDecoder, RequestUriFetcher};
use crate::session::EndUser;

const RESPONSE_TYPE_WORDS: [&str; 3] = ["code", "token", "id_token"];

/// Query parameters of `GET /authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub response_type: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    pub max_age: Option<u64>,
    pub login_hint: Option<String>,
    pub acr_values: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// JSON `claims` request parameter.
    pub claims: Option<String>,
    pub request: Option<String>,
    pub request_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    Requested,
    Granted,
    Denied,
}

/// Tracks one authorization attempt through its states.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub client_id: String,
    pub state: AuthorizationState,
}

impl Authorization {
    fn new(client_id: &str) -> Self {
        tracing::debug!(client_id, state = ?AuthorizationState::Requested, "authorization requested");
        Self {
            client_id: client_id.to_string(),
            state: AuthorizationState::Requested,
        }
    }

    fn transition(&mut self, next: AuthorizationState) {
        tracing::info!(client_id = %self.client_id, from = ?self.state, to = ?next, "authorization state");
        self.state = next;
    }
}

/// Redirect-style error (RFC 6749 §4.1.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizeError {
    pub error: &'static str,
    pub error_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizeError {
    pub fn new(error: &'static str, description: impl Into<String>, state: Option<String>) -> Self {
        Self {
            error,
            error_description: description.into(),
            state,
        }
    }
}

/// Where response parameters are placed on the redirect URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Query,
    Fragment,
}

impl ResponseMode {
    /// Query for `code`, fragment for implicit and hybrid responses.
    pub fn for_response_type(response_type: &str) -> Self {
        if response_type.split_whitespace().eq(["code"]) {
            Self::Query
        } else {
            Self::Fragment
        }
    }
}

/// Append `params` to `redirect_uri` in the given response mode.
pub fn redirect_with(redirect_uri: &str, mode: ResponseMode, params: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(redirect_uri).map_err(|_| Error::RedirectUriNotAllowed)?;
    match mode {
        ResponseMode::Query => {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }
        ResponseMode::Fragment => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in params {
                serializer.append_pair(name, value);
            }
            url.set_fragment(Some(&serializer.finish()));
        }
    }
    Ok(url.into())
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationOutcome {
    /// Send the user agent to `location`, carrying either the response or an
    /// [`AuthorizeError`].
    Redirect {
        location: String,
        state: AuthorizationState,
    },
    /// No usable session: hand the user agent to the login UI, then retry.
    LoginRequired {
        client_id: String,
        login_hint: Option<String>,
    },
}

/// Authorization parameters after the request object has been applied.
#[derive(Debug, Clone)]
struct Effective {
    response_type: String,
    redirect_uri: String,
    scope: String,
    state: Option<String>,
    nonce: Option<String>,
    prompt: Vec<String>,
    max_age: Option<u64>,
    login_hint: Option<String>,
    acr_values: Vec<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    claims: ClaimsRequest,
}

pub struct Authorizer<'a> {
    pub issuer: &'a TokenIssuer,
    pub clients: &'a dyn ClientStore,
    pub redirect_policy: &'a RedirectPolicy,
    pub request_objects: RequestObjectDecoder<'a>,
    pub fetcher: &'a dyn RequestUriFetcher,
}

impl Authorizer<'_> {
    /// Process one authorization request for `user` (the session's end user,
    /// if any) with the raw `Sec-Token-Binding` header, if any.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        user: Option<&EndUser>,
        token_binding: Option<&str>,
    ) -> Result<AuthorizationOutcome> {
        let client = self
            .clients
            .find(&request.client_id)
            .await?
            .ok_or(Error::InvalidClient)?;
        let mut authz = Authorization::new(&client.client_id);

        // The redirect URI may live in the request object, so decode first
        // and report failures once there is somewhere to redirect to.
        let object = self.load_request_object(request, &client).await;
        let redirect_uri = request
            .redirect_uri
            .clone()
            .or_else(|| {
                object
                    .as_ref()
                    .ok()
                    .and_then(|o| o.as_ref())
                    .and_then(|o| o.redirect_uri.clone())
            })
            .ok_or_else(|| Error::BadRequest("redirect_uri is required".to_string()))?;
        self.check_redirect_uri(&client, &redirect_uri)?;

        let response_type = request.response_type.clone().unwrap_or_default();
        let mode = ResponseMode::for_response_type(&response_type);

        let object = match object {
            Ok(object) => object,
            Err(e) => {
                tracing::info!(client_id = %client.client_id, error = %e, "request object rejected");
                let error = AuthorizeError::new(e.error_code(), e.to_string(), request.state.clone());
                return self.deny(&mut authz, &redirect_uri, mode, error);
            }
        };

        let params = match merge(request, object.as_ref(), redirect_uri.clone()) {
            Ok(params) => params,
            Err(error) => return self.deny(&mut authz, &redirect_uri, mode, error),
        };
        let mode = ResponseMode::for_response_type(&params.response_type);

        if let Err(error) = validate(&client, &params) {
            return self.deny(&mut authz, &params.redirect_uri, mode, error);
        }

        let token_binding_hash = match token_binding.map(binding::confirmation_hash).transpose() {
            Ok(hash) => hash,
            Err(e) => {
                let error = AuthorizeError::new("invalid_request", e.to_string(), params.state.clone());
                return self.deny(&mut authz, &params.redirect_uri, mode, error);
            }
        };

        let prompt_none = params.prompt.iter().any(|p| p == "none");
        let user = match user {
            Some(user) if session_too_old(user, params.max_age) => {
                let error = AuthorizeError::new("login_required", "authentication is older than max_age", params.state.clone());
                return self.deny(&mut authz, &params.redirect_uri, mode, error);
            }
            Some(user) => user,
            None if prompt_none => {
                let error = AuthorizeError::new("login_required", "no active session", params.state.clone());
                return self.deny(&mut authz, &params.redirect_uri, mode, error);
            }
            None => {
                tracing::debug!(client_id = %client.client_id, "authentication required");
                return Ok(AuthorizationOutcome::LoginRequired {
                    client_id: client.client_id.clone(),
                    login_hint: params.login_hint.clone(),
                });
            }
        };

        match self.mint(&client, user, &params, token_binding_hash).await {
            Ok(response) => {
                authz.transition(AuthorizationState::Granted);
                let pairs: Vec<(&str, &str)> = response
                    .iter()
                    .map(|(k, v)| (*k, v.as_str()))
                    .collect();
                Ok(AuthorizationOutcome::Redirect {
                    location: redirect_with(&params.redirect_uri, mode, &pairs)?,
                    state: authz.state,
                })
            }
            Err(e) => {
                tracing::error!(client_id = %client.client_id, error = %e, "token minting failed");
                let error = AuthorizeError::new("server_error", "token issuance failed", params.state.clone());
                self.deny(&mut authz, &params.redirect_uri, mode, error)
            }
        }
    }

    async fn load_request_object(
        &self,
        request: &AuthorizationRequest,
        client: &Client,
    ) -> Result<Option<RequestObject>> {
        let raw = match (&request.request, &request.request_uri) {
            (Some(_), Some(_)) => {
                return Err(Error::BadRequest("request and request_uri are mutually exclusive".to_string()));
            }
            (Some(request), None) => request.clone(),
            (None, Some(uri)) => self.request_objects.fetch(uri, client, self.fetcher).await?,
            (None, None) => return Ok(None),
        };
        self.request_objects.decode(&raw, client).map(Some)
    }

    fn check_redirect_uri(&self, client: &Client, redirect_uri: &str) -> Result<()> {
        if !client.redirect_uris.iter().any(|r| r == redirect_uri) {
            tracing::warn!(client_id = %client.client_id, redirect_uri, "unregistered redirect_uri");
            return Err(Error::RedirectUriNotAllowed);
        }
        if !self.redirect_policy.permits(redirect_uri) {
            tracing::warn!(client_id = %client.client_id, redirect_uri, "redirect_uri blocked by policy");
            return Err(Error::RedirectUriNotAllowed);
        }
        Ok(())
    }

    fn deny(
        &self,
        authz: &mut Authorization,
        redirect_uri: &str,
        mode: ResponseMode,
        error: AuthorizeError,
    ) -> Result<AuthorizationOutcome> {
        authz.transition(AuthorizationState::Denied);
        let mut pairs = vec![
            ("error", error.error),
            ("error_description", error.error_description.as_str()),
        ];
        if let Some(state) = error.state.as_deref() {
            pairs.push(("state", state));
        }
        Ok(AuthorizationOutcome::Redirect {
            location: redirect_with(redirect_uri, mode, &pairs)?,
            state: authz.state,
        })
    }

    /// Issue whatever the response type asks for, as response parameters.
    async fn mint(
        &self,
        client: &Client,
        user: &EndUser,
        params: &Effective,
        token_binding_hash: Option<String>,
    ) -> Result<Vec<(&'static str, String)>> {
        let words: Vec<&str> = params.response_type.split_whitespace().collect();
        let scopes: Vec<String> = params.scope.split_whitespace().map(str::to_string).collect();
        let acr = requested_acr(params, user);
        let mut response = Vec::new();

        let code = if words.contains(&"code") {
            let grant = Grant {
                redirect_uri: params.redirect_uri.clone(),
                scopes: scopes.clone(),
                nonce: params.nonce.clone(),
                acr: acr.clone(),
                code_challenge: params.code_challenge.clone(),
                code_challenge_method: params.code_challenge.as_ref().map(|_| {
                    params
                        .code_challenge_method
                        .clone()
                        .unwrap_or_else(|| "plain".to_string())
                }),
                token_binding_hash: token_binding_hash.clone(),
            };
            let code = self.issuer.issue_code(client, user, &grant).await?;
            response.push(("code", code.clone()));
            Some(code)
        } else {
            None
        };

        let access_token = if words.contains(&"token") {
            let issued = self
                .issuer
                .issue_access_token(
                    client,
                    &user.subject,
                    Some(&user.session_id),
                    &scopes,
                    token_binding_hash.as_deref(),
                )
                .await?;
            response.push(("access_token", issued.token.clone()));
            response.push(("token_type", "Bearer".to_string()));
            response.push(("expires_in", issued.expires_in.to_string()));
            Some(issued.token)
        } else {
            None
        };

        if words.contains(&"id_token") {
            let id_token = self.issuer.issue_id_token(
                client,
                &IdTokenParams {
                    subject: &user.subject,
                    session_id: Some(&user.session_id),
                    auth_time: Some(user.auth_time),
                    nonce: params.nonce.as_deref(),
                    acr: acr.as_deref(),
                    access_token: access_token.as_deref(),
                    code: code.as_deref(),
                    token_binding_hash: token_binding_hash.as_deref(),
                },
            )?;
            response.push(("id_token", id_token));
        }

        if let Some(state) = &params.state {
            response.push(("state", state.clone()));
        }
        Ok(response)
    }
}

/// Apply the request object over the query. Request-object values win;
/// `response_type`, `client_id` and `redirect_uri` must agree when present
/// in both.
fn merge(
    request: &AuthorizationRequest,
    object: Option<&RequestObject>,
    redirect_uri: String,
) -> std::result::Result<Effective, AuthorizeError> {
    let state = object
        .and_then(|o| o.state.clone())
        .or_else(|| request.state.clone());
    let mismatch = |name: &str| {
        AuthorizeError::new(
            "invalid_request_object",
            format!("{name} in request object does not match the request"),
            state.clone(),
        )
    };

    let query_claims = match request.claims.as_deref() {
        Some(raw) => serde_json::from_str::<ClaimsRequest>(raw).map_err(|_| {
            AuthorizeError::new("invalid_request", "claims parameter is not valid JSON", state.clone())
        })?,
        None => ClaimsRequest::default(),
    };

    let Some(object) = object else {
        return Ok(Effective {
            response_type: request.response_type.clone().unwrap_or_default(),
            redirect_uri,
            scope: request.scope.clone().unwrap_or_default(),
            state,
            nonce: request.nonce.clone(),
            prompt: split(request.prompt.as_deref()),
            max_age: request.max_age,
            login_hint: request.login_hint.clone(),
            acr_values: split(request.acr_values.as_deref()),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            claims: query_claims,
        });
    };

    if let (Some(ours), Some(theirs)) = (&request.response_type, &object.response_type)
        && ours != theirs
    {
        return Err(mismatch("response_type"));
    }
    if object.client_id.as_ref().is_some_and(|id| *id != request.client_id) {
        return Err(mismatch("client_id"));
    }
    if object.redirect_uri.as_ref().is_some_and(|uri| *uri != redirect_uri) {
        return Err(mismatch("redirect_uri"));
    }

    let acr_values = object.acr_values();
    Ok(Effective {
        response_type: object
            .response_type
            .clone()
            .or_else(|| request.response_type.clone())
            .unwrap_or_default(),
        redirect_uri,
        scope: object
            .scope
            .clone()
            .or_else(|| request.scope.clone())
            .unwrap_or_default(),
        state,
        nonce: object.nonce.clone().or_else(|| request.nonce.clone()),
        prompt: split(object.prompt.as_deref().or(request.prompt.as_deref())),
        max_age: object.effective_max_age().or(request.max_age),
        login_hint: object.login_hint.clone().or_else(|| request.login_hint.clone()),
        acr_values: if acr_values.is_empty() {
            split(request.acr_values.as_deref())
        } else {
            acr_values
        },
        code_challenge: object
            .code_challenge
            .clone()
            .or_else(|| request.code_challenge.clone()),
        code_challenge_method: object
            .code_challenge_method
            .clone()
            .or_else(|| request.code_challenge_method.clone()),
        claims: if object.claims_request.is_empty() {
            query_claims
        } else {
            object.claims_request.clone()
        },
    })
}

fn split(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn validate(client: &Client, params: &Effective) -> std::result::Result<(), AuthorizeError> {
    let fail = |error: &'static str, description: String| {
        Err(AuthorizeError::new(error, description, params.state.clone()))
    };

    let words: Vec<&str> = params.response_type.split_whitespace().collect();
    if words.is_empty() || words.iter().any(|w| !RESPONSE_TYPE_WORDS.contains(w)) {
        return fail("unsupported_response_type", format!("unsupported response_type '{}'", params.response_type));
    }
    if !client.allows_response_type(&params.response_type) {
        return fail("unsupported_response_type", format!("response_type '{}' not registered for this client", params.response_type));
    }

    let scopes: Vec<&str> = params.scope.split_whitespace().collect();
    if !scopes.contains(&"openid") {
        return fail("invalid_scope", "the openid scope is required".to_string());
    }
    if let Some(scope) = scopes.iter().find(|s| !client.allows_scope(s)) {
        return fail("invalid_scope", format!("scope not allowed for this client: {scope}"));
    }

    if let Err(e) = params.claims.validate() {
        return fail("invalid_request", e.to_string());
    }

    if words.contains(&"id_token") && params.nonce.is_none() {
        return fail("invalid_request", "nonce is required when an id_token is returned from the authorization endpoint".to_string());
    }

    if params.code_challenge.is_some() {
        let method = params.code_challenge_method.as_deref().unwrap_or("plain");
        if method != "S256" && method != "plain" {
            return fail("invalid_request", "code_challenge_method must be 'S256' or 'plain'".to_string());
        }
    } else if params.code_challenge_method.is_some() {
        return fail("invalid_request", "code_challenge_method without code_challenge".to_string());
    }
    Ok(())
}

fn session_too_old(user: &EndUser, max_age: Option<u64>) -> bool {
    max_age.is_some_and(|max_age| {
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        Utc::now().timestamp().saturating_sub(user.auth_time) > max_age
    })
}

/// The session's `acr`, when the request asked for it and it satisfies
/// any constraint on its value.
fn requested_acr(params: &Effective, user: &EndUser) -> Option<String> {
    let acr = user.acr.clone()?;
    let candidate = Value::String(acr.clone());
    match params.claims.id_token_claim("acr") {
        Some(Some(request)) if !request.admits(&candidate) => None,
        Some(_) => Some(acr),
        None if !params.acr_values.is_empty() => Some(acr),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::claims::{ClaimRequest, Protection, RequestObjectClaims};
    use crate::clients::{MemoryClientStore, test_client};
    use crate::config::{IssuerConfig, RequestObjectConfig};
    use crate::jwa::SignatureAlgorithm;
    use crate::jws::SigningKey;
    use crate::jwt;
    use crate::keys::KeyRegistry;
    use crate::request_object::StaticFetcher;
    use crate::store::MemoryStore;
    use crate::test_support::{self, CLIENT_SECRET, ISSUER};

    const CB: &str = "https://rp.example.com/cb";
    const TB_KEY: &[u8] = &[0x41; 65];
    const TB_SIG: &[u8] = &[0x07; 64];

    struct Fixture {
        issuer: TokenIssuer,
        clients: MemoryClientStore,
        policy: RedirectPolicy,
        registry: Arc<KeyRegistry>,
        config: RequestObjectConfig,
        fetcher: StaticFetcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_policy(RedirectPolicy::new::<&str>(&[], &[]).unwrap())
        }

        fn with_policy(policy: RedirectPolicy) -> Self {
            let registry = Arc::new(test_support::registry());
            Self {
                issuer: TokenIssuer::new(registry.clone(), Arc::new(MemoryStore::new()), IssuerConfig::new(ISSUER)),
                clients: MemoryClientStore::new([test_client("rp", CLIENT_SECRET)]),
                policy,
                registry,
                config: RequestObjectConfig::default(),
                fetcher: StaticFetcher(HashMap::new()),
            }
        }

        fn authorizer(&self) -> Authorizer<'_> {
            Authorizer {
                issuer: &self.issuer,
                clients: &self.clients,
                redirect_policy: &self.policy,
                request_objects: RequestObjectDecoder {
                    registry: &self.registry,
                    config: &self.config,
                    reject_none_alg: true,
                },
                fetcher: &self.fetcher,
            }
        }
    }

    fn alice() -> EndUser {
        EndUser {
            subject: "alice".into(),
            session_id: "sid-1".into(),
            auth_time: Utc::now().timestamp() - 60,
            acr: Some("silver".into()),
        }
    }

    fn code_request() -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: "rp".into(),
            response_type: Some("code".into()),
            redirect_uri: Some(CB.into()),
            scope: Some("openid email".into()),
            state: Some("xyz".into()),
            ..AuthorizationRequest::default()
        }
    }

    fn location(outcome: AuthorizationOutcome) -> Url {
        match outcome {
            AuthorizationOutcome::Redirect { location, .. } => Url::parse(&location).unwrap(),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn fragment(url: &Url) -> HashMap<String, String> {
        url::form_urlencoded::parse(url.fragment().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    #[tokio::test]
    async fn code_flow_redirects_with_code_in_query() {
        let fx = Fixture::new();
        let outcome = fx.authorizer().authorize(&code_request(), Some(&alice()), None).await.unwrap();
        let AuthorizationOutcome::Redirect { state, .. } = &outcome else {
            panic!("expected redirect");
        };
        assert_eq!(*state, AuthorizationState::Granted);

        let url = location(outcome);
        let params = query(&url);
        assert_eq!(params["state"], "xyz");
        let code = &params["code"];

        let client = test_client("rp", CLIENT_SECRET);
        let tokens = fx.issuer.exchange_code(&client, code, Some(CB), None).await.unwrap();
        assert!(tokens.id_token.is_some());
    }

    #[tokio::test]
    async fn implicit_flow_uses_fragment() {
        let fx = Fixture::new();
        let request = AuthorizationRequest {
            response_type: Some("id_token token".into()),
            nonce: Some("n".into()),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        assert!(url.query().is_none());
        let params = fragment(&url);
        assert_eq!(params["token_type"], "Bearer");
        let id_token = jwt::parse(&params["id_token"]).unwrap();
        assert_eq!(id_token.claims["nonce"], "n");
        assert_eq!(
            id_token.claims["at_hash"],
            crate::issuance::half_hash(SignatureAlgorithm::Rs256, &params["access_token"])
        );
    }

    #[tokio::test]
    async fn implicit_id_token_requires_nonce() {
        let fx = Fixture::new();
        let request = AuthorizationRequest {
            response_type: Some("id_token token".into()),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let params = fragment(&url);
        assert_eq!(params["error"], "invalid_request");
        assert_eq!(params["state"], "xyz");
    }

    #[tokio::test]
    async fn non_redirectable_errors() {
        let fx = Fixture::new();
        let unknown = AuthorizationRequest {
            client_id: "nobody".into(),
            ..code_request()
        };
        assert!(matches!(
            fx.authorizer().authorize(&unknown, Some(&alice()), None).await,
            Err(Error::InvalidClient)
        ));

        let unregistered = AuthorizationRequest {
            redirect_uri: Some("https://evil.example.com/cb".into()),
            ..code_request()
        };
        assert!(matches!(
            fx.authorizer().authorize(&unregistered, Some(&alice()), None).await,
            Err(Error::RedirectUriNotAllowed)
        ));
    }

    #[tokio::test]
    async fn policy_blocks_registered_redirect() {
        let policy = RedirectPolicy::new(&["*.example.org"], &[]).unwrap();
        let fx = Fixture::with_policy(policy);
        assert!(matches!(
            fx.authorizer().authorize(&code_request(), Some(&alice()), None).await,
            Err(Error::RedirectUriNotAllowed)
        ));
    }

    #[tokio::test]
    async fn redirectable_validation_errors() {
        let fx = Fixture::new();
        let cases = [
            (AuthorizationRequest { response_type: Some("token".into()), ..code_request() }, "unsupported_response_type"),
            (AuthorizationRequest { response_type: Some("bogus".into()), ..code_request() }, "unsupported_response_type"),
            (AuthorizationRequest { scope: Some("email".into()), ..code_request() }, "invalid_scope"),
            (AuthorizationRequest { scope: Some("openid admin".into()), ..code_request() }, "invalid_scope"),
            (
                AuthorizationRequest {
                    code_challenge: Some("abc".into()),
                    code_challenge_method: Some("S512".into()),
                    ..code_request()
                },
                "invalid_request",
            ),
            (
                AuthorizationRequest {
                    claims: Some(r#"{"id_token":{"acr":{"essential":"yes"}}}"#.into()),
                    ..code_request()
                },
                "invalid_request",
            ),
            (
                AuthorizationRequest {
                    claims: Some(r#"{"userinfo":{"email":"please"}}"#.into()),
                    ..code_request()
                },
                "invalid_request",
            ),
        ];
        for (request, expected) in cases {
            let outcome = fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap();
            let AuthorizationOutcome::Redirect { state, .. } = &outcome else {
                panic!("expected redirect");
            };
            assert_eq!(*state, AuthorizationState::Denied);
            let url = location(outcome);
            let params = if url.query().is_some() { query(&url) } else { fragment(&url) };
            assert_eq!(params["error"], expected, "{request:?}");
        }
    }

    #[tokio::test]
    async fn missing_session() {
        let fx = Fixture::new();
        let outcome = fx.authorizer().authorize(&code_request(), None, None).await.unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::LoginRequired { .. }));

        let silent = AuthorizationRequest {
            prompt: Some("none".into()),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&silent, None, None).await.unwrap());
        assert_eq!(query(&url)["error"], "login_required");

        let stale = AuthorizationRequest {
            max_age: Some(10),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&stale, Some(&alice()), None).await.unwrap());
        assert_eq!(query(&url)["error"], "login_required");

        let lenient = AuthorizationRequest {
            max_age: Some(u64::MAX),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&lenient, Some(&alice()), None).await.unwrap());
        let params = query(&url);
        assert!(params.contains_key("code"), "{url}");
        assert!(!params.contains_key("error"));
    }

    #[tokio::test]
    async fn claims_parameter_shapes_id_token_at_exchange() {
        let fx = Fixture::new();
        let request = AuthorizationRequest {
            claims: Some(
                r#"{"id_token":{"acr":{"values":["silver"]},"email":{"value":"mallory@example.com"}}}"#.into(),
            ),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let code = query(&url)["code"].clone();

        let client = test_client("rp", CLIENT_SECRET);
        let tokens = fx.issuer.exchange_code(&client, &code, Some(CB), None).await.unwrap();
        let id_token = jwt::parse(&tokens.id_token.unwrap()).unwrap();
        assert_eq!(id_token.claims["acr"], "silver");
        assert!(id_token.claims.get("email").is_none());

        let request = AuthorizationRequest {
            claims: Some(r#"{"id_token":{"acr":{"values":["gold"]}}}"#.into()),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let code = query(&url)["code"].clone();
        let tokens = fx.issuer.exchange_code(&client, &code, Some(CB), None).await.unwrap();
        let id_token = jwt::parse(&tokens.id_token.unwrap()).unwrap();
        assert!(id_token.claims.get("acr").is_none());
    }

    #[tokio::test]
    async fn request_object_overrides_query() {
        let fx = Fixture::new();
        let request_object = RequestObjectClaims::new()
            .client_id("rp")
            .response_type("code")
            .scope("openid profile")
            .state("from-object")
            .nonce("object-nonce")
            .add_id_token_claim("acr", Some(ClaimRequest::values(["silver", "gold"])))
            .encode(Protection::Signed {
                alg: SignatureAlgorithm::Hs256,
                key: SigningKey::Secret(CLIENT_SECRET.as_bytes()),
                kid: None,
            })
            .unwrap();
        let request = AuthorizationRequest {
            request: Some(request_object),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let params = query(&url);
        assert_eq!(params["state"], "from-object");

        let client = test_client("rp", CLIENT_SECRET);
        let tokens = fx.issuer.exchange_code(&client, &params["code"], Some(CB), None).await.unwrap();
        assert_eq!(tokens.scope.as_deref(), Some("openid profile"));
        let id_token = jwt::parse(&tokens.id_token.unwrap()).unwrap();
        assert_eq!(id_token.claims["nonce"], "object-nonce");
        assert_eq!(id_token.claims["acr"], "silver");
    }

    #[tokio::test]
    async fn bad_request_object_redirects_with_error() {
        let fx = Fixture::new();
        let forged = RequestObjectClaims::new()
            .client_id("rp")
            .encode(Protection::Signed {
                alg: SignatureAlgorithm::Hs256,
                key: SigningKey::Secret(b"not the client secret"),
                kid: None,
            })
            .unwrap();
        let request = AuthorizationRequest {
            request: Some(forged),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let params = query(&url);
        assert_eq!(params["error"], "invalid_request_object");
        assert_eq!(params["state"], "xyz");

        let mismatched = RequestObjectClaims::new()
            .client_id("someone-else")
            .encode(Protection::Signed {
                alg: SignatureAlgorithm::Hs256,
                key: SigningKey::Secret(CLIENT_SECRET.as_bytes()),
                kid: None,
            })
            .unwrap();
        let request = AuthorizationRequest {
            request: Some(mismatched),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        assert_eq!(query(&url)["error"], "invalid_request_object");
    }

    #[tokio::test]
    async fn request_object_with_unknown_kid_is_rejected() {
        let fx = Fixture::new();
        let key = test_support::rsa_key();
        let request_object = RequestObjectClaims::new()
            .client_id("rp")
            .response_type("code")
            .encode(Protection::Signed {
                alg: SignatureAlgorithm::Rs256,
                key: SigningKey::Private(&key),
                kid: Some("no-such-kid"),
            })
            .unwrap();
        let request = AuthorizationRequest {
            request: Some(request_object),
            ..code_request()
        };
        let url = location(fx.authorizer().authorize(&request, Some(&alice()), None).await.unwrap());
        let params = query(&url);
        assert_eq!(params["error"], "invalid_request_object");
        assert_eq!(params["state"], "xyz");
        assert!(!params.contains_key("code"));
    }

    #[tokio::test]
    async fn token_binding_header() {
        let fx = Fixture::new();
        let header = binding::encode_message(&[(0, 2, TB_KEY, TB_SIG)]);
        let expected = binding::confirmation_hash(&header).unwrap();
        let url = location(
            fx.authorizer()
                .authorize(&code_request(), Some(&alice()), Some(&header))
                .await
                .unwrap(),
        );
        let client = test_client("rp", CLIENT_SECRET);
        let tokens = fx
            .issuer
            .exchange_code(&client, &query(&url)["code"], Some(CB), None)
            .await
            .unwrap();
        let id_token = jwt::parse(&tokens.id_token.unwrap()).unwrap();
        assert_eq!(id_token.claims["cnf"]["token_binding_hash"], expected);

        let url = location(
            fx.authorizer()
                .authorize(&code_request(), Some(&alice()), Some("%%%"))
                .await
                .unwrap(),
        );
        assert_eq!(query(&url)["error"], "invalid_request");
    }

    #[test]
    fn response_modes() {
        assert_eq!(ResponseMode::for_response_type("code"), ResponseMode::Query);
        assert_eq!(ResponseMode::for_response_type("code id_token"), ResponseMode::Fragment);
        assert_eq!(ResponseMode::for_response_type("token"), ResponseMode::Fragment);

        let with_query = redirect_with("https://rp.example.com/cb?x=1", ResponseMode::Query, &[("code", "a b")]).unwrap();
        assert_eq!(with_query, "https://rp.example.com/cb?x=1&code=a+b");
        let with_fragment = redirect_with(CB, ResponseMode::Fragment, &[("error", "login_required")]).unwrap();
        assert_eq!(with_fragment, "https://rp.example.com/cb#error=login_required");
    }
}
