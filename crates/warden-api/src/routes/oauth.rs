use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use warden_core::authorize::{AuthorizationOutcome, AuthorizationRequest, Authorizer};
use warden_core::binding;
use warden_core::clients::{self, Client, ClientCredentials};
use warden_core::error::Error;
use warden_core::introspection::{IntrospectionResponse, Introspector};
use warden_core::issuance::TokenResponse;
use warden_core::request_object::RequestObjectDecoder;
use warden_core::session::{self, EndUser};

use crate::server::AppState;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct TokenRequest {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
}

#[derive(Deserialize)]
pub struct IntrospectRequest {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Body returned when the end user has to sign in first.
#[derive(Serialize)]
struct LoginRequiredBody {
    error: &'static str,
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_hint: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .route("/introspect", post(introspect))
        .route("/revoke", post(revoke))
}

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The end user behind the session cookie. A missing or invalid session is
/// treated as no session.
fn session_user(state: &AppState, jar: &CookieJar) -> Option<EndUser> {
    let cookie = jar.get(&state.session_cookie)?;
    match session::verify_session(&state.registry, &state.config.issuer.issuer, cookie.value()) {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring invalid session cookie");
            None
        }
    }
}

async fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<Client, Error> {
    let credentials = ClientCredentials::from_request(header(headers, AUTHORIZATION), client_id, client_secret)
        .ok_or(Error::InvalidClient)?;
    clients::authenticate(state.clients.as_ref(), &credentials).await
}

/// GET /authorize: authorization endpoint
async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizationRequest>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let user = session_user(&state, &jar);
    let authorizer = Authorizer {
        issuer: &state.issuer,
        clients: state.clients.as_ref(),
        redirect_policy: &state.redirect_policy,
        request_objects: RequestObjectDecoder {
            registry: &state.registry,
            config: &state.config.request_object,
            reject_none_alg: state.config.issuer.reject_none_alg,
        },
        fetcher: state.fetcher.as_ref(),
    };

    let outcome = authorizer
        .authorize(&query, user.as_ref(), header(&headers, binding::HEADER_NAME))
        .await?;

    Ok(match outcome {
        AuthorizationOutcome::Redirect { location, .. } => {
            (StatusCode::FOUND, [(LOCATION, location)]).into_response()
        }
        AuthorizationOutcome::LoginRequired { client_id, login_hint } => (
            StatusCode::UNAUTHORIZED,
            Json(LoginRequiredBody {
                error: "login_required",
                client_id,
                login_hint,
            }),
        )
            .into_response(),
    })
}

/// POST /token: token endpoint
async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<TokenRequest>,
) -> Result<([(axum::http::HeaderName, &'static str); 1], Json<TokenResponse>), Error> {
    let client = authenticate_client(
        &state,
        &headers,
        body.client_id.as_deref(),
        body.client_secret.as_deref(),
    )
    .await?;

    match body.grant_type.as_str() {
        "authorization_code" => {
            let code = body.code.as_deref().ok_or(Error::InvalidGrant)?;
            let response = state
                .issuer
                .exchange_code(
                    &client,
                    code,
                    body.redirect_uri.as_deref(),
                    body.code_verifier.as_deref(),
                )
                .await?;
            Ok(([(CACHE_CONTROL, "no-store")], Json(response)))
        }
        other => Err(Error::UnsupportedGrantType(other.to_string())),
    }
}

/// POST /introspect: token introspection (RFC 7662). Always 200.
async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<IntrospectRequest>,
) -> Json<IntrospectionResponse> {
    let introspector = Introspector {
        issuer: &state.issuer,
        clients: state.clients.as_ref(),
    };
    Json(introspector.introspect(&body.token, header(&headers, AUTHORIZATION)).await)
}

/// POST /revoke: revoke an access token (RFC 7009)
async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<RevokeRequest>,
) -> Result<StatusCode, Error> {
    let client = authenticate_client(
        &state,
        &headers,
        body.client_id.as_deref(),
        body.client_secret.as_deref(),
    )
    .await?;

    // RFC 7009: the response is 200 whether or not the token was known
    if let Err(e) = state.issuer.revoke(&client, &body.token).await {
        tracing::warn!(error = %e, client_id = %client.client_id, "token revocation failed");
    }
    Ok(StatusCode::OK)
}
