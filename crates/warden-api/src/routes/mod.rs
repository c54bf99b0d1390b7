use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use warden_core::jwa::{ContentEncryptionAlgorithm, KeyEncryptionAlgorithm, SignatureAlgorithm};
use warden_core::keys::Jwks;

pub mod oauth;

use crate::server::AppState;

const RESPONSE_TYPES: [&str; 6] = [
    "code",
    "id_token",
    "id_token token",
    "code id_token",
    "code token",
    "code id_token token",
];

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn jwks(State(state): State<AppState>) -> Json<Jwks> {
    Json(state.registry.jwks())
}

/// OpenID Connect Discovery document (per OpenID Connect Discovery 1.0).
async fn openid_configuration(State(state): State<AppState>) -> Json<serde_json::Value> {
    let base = state.config.server.public_url.trim_end_matches('/');
    let issuer = &state.config.issuer;

    let mut id_token_algs: Vec<&str> = state
        .registry
        .signing_algorithms()
        .into_iter()
        .map(SignatureAlgorithm::as_str)
        .collect();
    let mut request_object_algs = id_token_algs.clone();
    if issuer.allow_unsigned_id_tokens {
        id_token_algs.push(SignatureAlgorithm::None.as_str());
    }
    if !issuer.reject_none_alg {
        request_object_algs.push(SignatureAlgorithm::None.as_str());
    }
    let key_algs: Vec<&str> = KeyEncryptionAlgorithm::ALL
        .into_iter()
        .map(KeyEncryptionAlgorithm::as_str)
        .collect();
    let enc_algs: Vec<&str> = ContentEncryptionAlgorithm::ALL
        .into_iter()
        .map(ContentEncryptionAlgorithm::as_str)
        .collect();

    Json(serde_json::json!({
        "issuer": issuer.issuer,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "introspection_endpoint": format!("{base}/introspect"),
        "revocation_endpoint": format!("{base}/revoke"),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "response_types_supported": RESPONSE_TYPES,
        "response_modes_supported": ["query", "fragment"],
        "grant_types_supported": ["authorization_code", "implicit"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": id_token_algs,
        "id_token_encryption_alg_values_supported": key_algs,
        "id_token_encryption_enc_values_supported": enc_algs,
        "request_object_signing_alg_values_supported": request_object_algs,
        "request_object_encryption_alg_values_supported": key_algs,
        "request_object_encryption_enc_values_supported": enc_algs,
        "request_parameter_supported": true,
        "request_uri_parameter_supported": true,
        "require_request_uri_registration": false,
        "claims_parameter_supported": true,
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "id_token_token_binding_cnf_values_supported": issuer.token_binding_cnf_values_supported,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .merge(oauth::router())
}
