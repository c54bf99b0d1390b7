use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use warden_core::clients::{ClientStore, MemoryClientStore};
use warden_core::config::Config;
use warden_core::issuance::TokenIssuer;
use warden_core::keys::KeyRegistry;
use warden_core::redirect::RedirectPolicy;
use warden_core::request_object::{HttpRequestUriFetcher, RequestUriFetcher};
use warden_core::session::session_cookie_name;
use warden_core::store::{MemoryStore, TokenStore};

use crate::routes;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<KeyRegistry>,
    pub issuer: Arc<TokenIssuer>,
    pub clients: Arc<dyn ClientStore>,
    pub redirect_policy: Arc<RedirectPolicy>,
    pub fetcher: Arc<dyn RequestUriFetcher>,
    pub session_cookie: String,
}

impl AppState {
    /// Wire the in-memory stores and the HTTP `request_uri` fetcher.
    pub fn new(config: Config, registry: KeyRegistry) -> warden_core::Result<Self> {
        let registry = Arc::new(registry);
        let store: Arc<dyn TokenStore> = Arc::new(MemoryStore::new());
        let clients = MemoryClientStore::from_config(&config.clients)?;
        let fetcher = HttpRequestUriFetcher::new()?;
        Self::with_parts(config, registry, store, Arc::new(clients), Arc::new(fetcher))
    }

    pub fn with_parts(
        config: Config,
        registry: Arc<KeyRegistry>,
        store: Arc<dyn TokenStore>,
        clients: Arc<dyn ClientStore>,
        fetcher: Arc<dyn RequestUriFetcher>,
    ) -> warden_core::Result<Self> {
        let redirect_policy = RedirectPolicy::new(
            &config.redirect.client_white_list,
            &config.redirect.client_black_list,
        )?;
        let issuer = TokenIssuer::new(registry.clone(), store, config.issuer.clone());
        let session_cookie = session_cookie_name(&config.server.cookie_prefix);
        Ok(Self {
            config: Arc::new(config),
            registry,
            issuer: Arc::new(issuer),
            clients,
            redirect_policy: Arc::new(redirect_policy),
            fetcher,
            session_cookie,
        })
    }
}

pub async fn serve(config: Config, registry: KeyRegistry) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let cors = build_cors(&config);
    let state = AppState::new(config, registry)?;

    spawn_cleanup(state.issuer.store().clone());

    let app = Router::new()
        .merge(routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, "starting server");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically drop expired codes and tokens from the store.
fn spawn_cleanup(store: Arc<dyn TokenStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "expired tokens cleaned up"),
                Err(e) => tracing::warn!(error = %e, "token cleanup failed"),
            }
        }
    });
}

fn build_cors(config: &Config) -> CorsLayer {
    let origins = &config.server.cors_origins;
    if origins.is_empty() {
        tracing::warn!("no cors_origins configured, using permissive CORS (not safe for production)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received CTRL+C"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                ctrl_c.await.ok();
                tracing::info!("received CTRL+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received CTRL+C");
    }
}
