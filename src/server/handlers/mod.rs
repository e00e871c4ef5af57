pub mod health;
pub mod playlist;
pub mod proxy;

use crate::{
    error::{RelayError, Result},
    metrics,
    upstream::Resource,
};
use axum::response::Response;
use std::collections::HashMap;
use std::time::Instant;

/// Query string shared by the relay routes
///
/// Built from a plain string map so that any query string reaches the
/// handler; a repeated key keeps its last value.
#[derive(Debug, Default)]
pub struct TargetParams {
    /// Absolute upstream URL to relay
    pub url: Option<String>,
    /// Older key links carried the target as `keyUrl`
    pub key_url: Option<String>,
}

impl From<HashMap<String, String>> for TargetParams {
    fn from(mut query: HashMap<String, String>) -> Self {
        Self {
            url: query.remove("url"),
            key_url: query.remove("keyUrl"),
        }
    }
}

impl TargetParams {
    /// The `url` parameter, rejecting absent or empty values.
    pub fn target(self) -> Result<String> {
        non_empty(self.url)
    }

    /// `url`, falling back to the legacy `keyUrl`.
    pub fn key_target(self) -> Result<String> {
        non_empty(self.url.filter(|u| !u.is_empty()).or(self.key_url))
    }
}

/// Count a finished relay request by route and response status.
fn record_outcome(resource: Resource, result: &Result<Response>, start: Instant) {
    let route = resource.route();
    let status = match result {
        Ok(response) => response.status(),
        Err(e) => {
            if matches!(
                e,
                RelayError::UpstreamStatus { .. }
                    | RelayError::UpstreamTimeout { .. }
                    | RelayError::UpstreamRequest(_)
            ) {
                metrics::record_upstream_error(route);
            }
            e.status_code()
        }
    };
    metrics::record_request(route, status.as_u16());
    metrics::record_duration(route, start);
}

fn non_empty(value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(RelayError::MissingUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(url: Option<&str>, key_url: Option<&str>) -> TargetParams {
        TargetParams {
            url: url.map(str::to_string),
            key_url: key_url.map(str::to_string),
        }
    }

    #[test]
    fn target_requires_non_empty_url() {
        assert!(matches!(params(None, None).target(), Err(RelayError::MissingUrl)));
        assert!(matches!(params(Some(""), None).target(), Err(RelayError::MissingUrl)));
        assert_eq!(params(Some("https://a/b"), None).target().unwrap(), "https://a/b");
    }

    #[test]
    fn built_from_query_map() {
        let query = HashMap::from([
            ("url".to_string(), "https://a/u".to_string()),
            ("keyUrl".to_string(), "https://a/k".to_string()),
            ("other".to_string(), "x".to_string()),
        ]);
        let params = TargetParams::from(query);
        assert_eq!(params.url.as_deref(), Some("https://a/u"));
        assert_eq!(params.key_url.as_deref(), Some("https://a/k"));

        let empty = TargetParams::from(HashMap::new());
        assert!(matches!(empty.target(), Err(RelayError::MissingUrl)));
    }

    #[test]
    fn target_ignores_key_url() {
        assert!(matches!(
            params(None, Some("https://a/k")).target(),
            Err(RelayError::MissingUrl)
        ));
    }

    #[test]
    fn key_target_falls_back_to_key_url() {
        assert_eq!(
            params(None, Some("https://a/k")).key_target().unwrap(),
            "https://a/k"
        );
        assert_eq!(
            params(Some("https://a/u"), Some("https://a/k")).key_target().unwrap(),
            "https://a/u"
        );
        assert_eq!(
            params(Some(""), Some("https://a/k")).key_target().unwrap(),
            "https://a/k"
        );
        assert!(matches!(
            params(Some(""), Some("")).key_target(),
            Err(RelayError::MissingUrl)
        ));
    }
}
