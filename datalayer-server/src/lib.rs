//! Datalayer Server: the HTTP query surface.
//!
//! Layout:
//! - `GET /health/live`, `GET /health/ready` (no auth)
//! - `GET {prefix}/data/{prices,realestate,providers}` (bearer)
//! - `GET {prefix}/analytics/provider-summary` (bearer)
//!
//! Repository work (listing, downloads, parquet scans) is blocking and runs on
//! the tokio blocking pool, one repository per request.

pub mod error;
mod middleware;
mod routes;

pub use error::{ApiError, ErrorResponse};

use axum::routing::get;
use axum::Router;
use datalayer_core::data::{CacheError, CacheManager, HttpFetcher, RemoteFetcher};
use datalayer_core::{DataAccessError, DataRepository, Settings, TokenProvider, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] TransportError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared per-process state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    cache: CacheManager,
    fetcher: Arc<dyn RemoteFetcher>,
    tokens: Arc<TokenProvider>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        cache: CacheManager,
        fetcher: Arc<dyn RemoteFetcher>,
        tokens: Arc<TokenProvider>,
    ) -> Self {
        Self {
            settings,
            cache,
            fetcher,
            tokens,
        }
    }

    /// Production wiring: disk cache, HTTP fetcher, settings-backed token provider.
    ///
    /// Builds a blocking HTTP client, so call it outside the async runtime.
    pub fn from_settings(settings: Settings) -> Result<Self, StartupError> {
        let cache = CacheManager::new(&settings.cache_dir, settings.cache_ttl)?;
        let fetcher = Arc::new(HttpFetcher::new(settings.download_timeout)?);
        let tokens = Arc::new(TokenProvider::from_settings(&settings));
        Ok(Self::new(Arc::new(settings), cache, fetcher, tokens))
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    pub fn repository(&self) -> DataRepository {
        DataRepository::new(&self.settings, self.cache.clone(), self.fetcher.clone())
    }

    /// Run a repository call on the blocking pool.
    pub(crate) async fn with_repository<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&DataRepository) -> Result<T, DataAccessError> + Send + 'static,
    {
        let repo = self.repository();
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| ApiError::Internal(format!("repository task failed: {e}")))?
            .map_err(ApiError::from)
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/data/prices", get(routes::data::prices))
        .route("/data/realestate", get(routes::data::realestate))
        .route("/data/providers", get(routes::data::providers))
        .route(
            "/analytics/provider-summary",
            get(routes::analytics::provider_summary),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_bearer,
        ));

    let base = Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready));

    // Nesting at "/" is not allowed; merge instead
    let app = if state.settings.api_prefix == "/" {
        base.merge(protected)
    } else {
        base.nest(&state.settings.api_prefix, protected)
    };

    app.layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, shutdown: F) -> Result<(), StartupError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = state.settings.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    info!(
        bind_addr = %addr,
        environment = %state.settings.environment,
        api_prefix = %state.settings.api_prefix,
        "datalayer-server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StartupError::Serve)
}
