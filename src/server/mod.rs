pub mod access_policy;
pub mod handlers;
pub mod state;

use crate::{config::Config, error::Result};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    middleware,
    response::Response,
    routing::get,
};
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Route paths. Rewritten playlists point players back at these.
pub mod routes {
    pub const PLAYLIST: &str = "/";
    pub const SEGMENT: &str = "/proxy-ts";
    pub const KEY: &str = "/proxy-key";
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
}

static VERSION_HEADER: HeaderName = HeaderName::from_static("x-relay-version");

/// Build the Axum router with all routes and middleware
pub fn build_router(config: Config) -> Result<Router> {
    let state = AppState::new(config)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS]);

    Ok(Router::new()
        .route(routes::PLAYLIST, get(handlers::playlist::serve_playlist))
        .route(routes::SEGMENT, get(handlers::proxy::proxy_segment))
        .route(routes::KEY, get(handlers::proxy::proxy_key))
        .route(routes::HEALTH, get(handlers::health::health_check))
        .route(routes::METRICS, get(handlers::health::metrics))
        .layer(middleware::map_response(add_version_header))
        .layer(cors)
        .with_state(state))
}

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER.clone(),
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let app = build_router(config)?;

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Relay listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
