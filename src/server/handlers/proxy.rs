use super::{TargetParams, record_outcome};
use crate::{error::Result, server::state::AppState, upstream::Resource};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

/// Stream a media segment from upstream unmodified
pub async fn proxy_segment(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let result = match TargetParams::from(params).target() {
        Ok(target) => relay_stream(Resource::Segment, &target, &state).await,
        Err(e) => Err(e),
    };
    record_outcome(Resource::Segment, &result, start);
    result
}

/// Stream an encryption key from upstream unmodified
pub async fn proxy_key(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let result = match TargetParams::from(params).key_target() {
        Ok(target) => relay_stream(Resource::Key, &target, &state).await,
        Err(e) => Err(e),
    };
    record_outcome(Resource::Key, &result, start);
    result
}

/// Forward the upstream body as a stream.
///
/// The upstream response is owned by the body stream. When the client goes
/// away hyper drops the body, which drops the response and closes the
/// upstream connection. Errors after the headers are sent can only end the
/// connection, so they are logged here.
async fn relay_stream(resource: Resource, target: &str, state: &AppState) -> Result<Response> {
    let (url, response) = state.upstream.fetch(target, resource).await?;

    let stream = response.bytes_stream().inspect_err(move |e| {
        warn!("Upstream {} stream from {} aborted: {}", resource, url, e);
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, resource.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
