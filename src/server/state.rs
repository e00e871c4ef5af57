use crate::{
    config::Config,
    error::Result,
    hls::RewriteTargets,
    metrics,
    server::routes,
    upstream::Upstream,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across all handlers
///
/// Everything here is read-only after startup; requests share no mutable state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Policy-gated upstream client with connection pooling
    pub upstream: Upstream,
    /// Where rewritten playlist references point
    pub targets: Arc<RewriteTargets>,
    /// Renders the `/metrics` endpoint
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let upstream = Upstream::new(&config)?;
        let targets = rewrite_targets(&config);

        Ok(Self {
            config: Arc::new(config),
            upstream,
            targets: Arc::new(targets),
            metrics: metrics::install(),
            started_at: Instant::now(),
        })
    }
}

/// Relay routes as seen by players, prefixed with the public base URL.
pub fn rewrite_targets(config: &Config) -> RewriteTargets {
    let base = config.public_base_url.as_str();
    RewriteTargets {
        segment_path: format!("{}{}", base, routes::SEGMENT),
        key_path: format!("{}{}", base, routes::KEY),
        playlist_path: config
            .rewrite_variants
            .then(|| format!("{}{}", base, routes::PLAYLIST)),
    }
}
