use crate::hls::ParseError;
use crate::upstream::Resource;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("URL rejected by access policy: {0}")]
    Forbidden(String),

    #[error("Upstream returned {status} for {resource}")]
    UpstreamStatus {
        resource: Resource,
        status: StatusCode,
    },

    #[error("Upstream {resource} sent no response headers within {after:?}")]
    UpstreamTimeout { resource: Resource, after: Duration },

    #[error("Upstream request failed: {0}")]
    UpstreamRequest(#[from] reqwest::Error),

    #[error("Playlist parse error: {0}")]
    PlaylistParse(#[from] ParseError),

    #[error("Invalid upstream header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Failed to build upstream client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl RelayError {
    /// HTTP status reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingUrl => StatusCode::BAD_REQUEST,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::UpstreamStatus { status, .. } => *status,
            RelayError::UpstreamTimeout { .. }
            | RelayError::UpstreamRequest(_)
            | RelayError::PlaylistParse(_)
            | RelayError::InvalidHeader(_)
            | RelayError::ClientBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body reported to the client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::MissingUrl => "Missing url parameter".to_string(),
            RelayError::Forbidden(_) => "Forbidden".to_string(),
            // The reason is the canonical phrase for the status code. A custom
            // phrase sent by upstream is not forwarded.
            RelayError::UpstreamStatus { resource, status } => format!(
                "Failed to fetch {}: {}",
                resource.label(),
                status.canonical_reason().unwrap_or("Unknown Status")
            ),
            _ => "Internal Server Error".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && !matches!(self, RelayError::UpstreamStatus { .. }) {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }

        (status, self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn missing_url_is_400() {
        let response = RelayError::MissingUrl.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Missing url parameter");
    }

    #[tokio::test]
    async fn forbidden_hides_url() {
        let response = RelayError::Forbidden("https://evil.example/x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "Forbidden");
    }

    #[tokio::test]
    async fn upstream_status_is_mirrored() {
        let response = RelayError::UpstreamStatus {
            resource: Resource::Playlist,
            status: StatusCode::NOT_FOUND,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Failed to fetch m3u8 file: Not Found");
    }

    #[tokio::test]
    async fn upstream_status_names_resource() {
        let segment = RelayError::UpstreamStatus {
            resource: Resource::Segment,
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert_eq!(
            segment.public_message(),
            "Failed to fetch .ts segment: Service Unavailable"
        );

        let key = RelayError::UpstreamStatus {
            resource: Resource::Key,
            status: StatusCode::UNAUTHORIZED,
        };
        assert_eq!(
            key.public_message(),
            "Failed to fetch encryption key: Unauthorized"
        );
    }

    #[test]
    fn nonstandard_upstream_status_has_fallback_reason() {
        let error = RelayError::UpstreamStatus {
            resource: Resource::Segment,
            status: StatusCode::from_u16(599).unwrap(),
        };
        assert_eq!(error.status_code().as_u16(), 599);
        assert_eq!(
            error.public_message(),
            "Failed to fetch .ts segment: Unknown Status"
        );
    }

    #[tokio::test]
    async fn header_timeout_is_generic_500() {
        let response = RelayError::UpstreamTimeout {
            resource: Resource::Key,
            after: Duration::from_secs(30),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn parse_failure_is_generic_500() {
        let response = RelayError::from(ParseError::MissingHeader).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
    }
}
