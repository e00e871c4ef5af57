use super::{TargetParams, record_outcome};
use crate::{error::Result, hls::rewrite, metrics, server::state::AppState, upstream::Resource};
use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::time::Instant;

/// Fetch a playlist from upstream and serve it with every segment and key
/// reference routed back through the relay
pub async fn serve_playlist(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let result = relay_playlist(TargetParams::from(params), &state).await;
    record_outcome(Resource::Playlist, &result, start);
    result
}

async fn relay_playlist(params: TargetParams, state: &AppState) -> Result<Response> {
    let target = params.target()?;
    let (base, response) = state.upstream.fetch(&target, Resource::Playlist).await?;
    let text = response.text().await?;

    let (body, stats) = rewrite(&text, &base, &state.targets)?;
    metrics::record_rewritten("segment", stats.segments);
    metrics::record_rewritten("key", stats.keys);
    metrics::record_rewritten("playlist", stats.playlists);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, Resource::Playlist.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
