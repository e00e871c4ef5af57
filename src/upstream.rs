//! The relay's only path to the upstream host.
//!
//! [`Upstream::fetch`] applies the [`AccessPolicy`] before every request, so
//! no handler can reach a host outside the allow-list. Redirects are followed
//! only while they stay on the allowed host.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::server::access_policy::AccessPolicy;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, redirect};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const SEC_CH_UA: &str =
    "\"Google Chrome\";v=\"129\", \"Not=A?Brand\";v=\"8\", \"Chromium\";v=\"129\"";
pub const SEC_CH_UA_PLATFORM: &str = "\"macOS\"";
pub const SEC_CH_UA_MOBILE: &str = "?0";
pub const DNT: &str = "1";

const MAX_REDIRECTS: usize = 5;

/// What kind of resource a fetch is for. Drives error text, response
/// content type and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Playlist,
    Segment,
    Key,
}

impl Resource {
    /// Human-readable name used in upstream failure messages.
    pub fn label(self) -> &'static str {
        match self {
            Resource::Playlist => "m3u8 file",
            Resource::Segment => ".ts segment",
            Resource::Key => "encryption key",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Resource::Playlist => "application/vnd.apple.mpegurl",
            Resource::Segment => "video/MP2T",
            Resource::Key => "application/octet-stream",
        }
    }

    /// Metric label
    pub fn route(self) -> &'static str {
        match self {
            Resource::Playlist => "playlist",
            Resource::Segment => "segment",
            Resource::Key => "key",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Browser-impersonating headers sent with every upstream request.
pub fn browser_headers(config: &Config) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static(SEC_CH_UA_PLATFORM),
    );
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(&config.upstream_referer)?,
    );
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(&config.upstream_user_agent)?,
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(SEC_CH_UA),
    );
    headers.insert(header::DNT, HeaderValue::from_static(DNT));
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static(SEC_CH_UA_MOBILE),
    );
    Ok(headers)
}

/// Pooled HTTP client bound to the access policy.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: Client,
    policy: AccessPolicy,
    timeout: Duration,
}

impl Upstream {
    pub fn new(config: &Config) -> Result<Self> {
        let policy = AccessPolicy::new(config.upstream_host.clone());
        let redirect_policy = policy.clone();

        let client = Client::builder()
            .default_headers(browser_headers(config)?)
            .connect_timeout(config.upstream_timeout)
            .read_timeout(config.upstream_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .redirect(redirect::Policy::custom(move |attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    attempt.error("too many redirects")
                } else if redirect_policy.is_permitted(attempt.url().as_str()) {
                    attempt.follow()
                } else {
                    warn!("Refusing redirect to {}", attempt.url());
                    attempt.stop()
                }
            }))
            .build()
            .map_err(RelayError::ClientBuild)?;

        Ok(Self {
            client,
            policy,
            timeout: config.upstream_timeout,
        })
    }

    /// GET `url` from upstream after checking it against the access policy.
    ///
    /// Returns the parsed URL alongside the response so callers can resolve
    /// relative references against exactly what was requested.
    ///
    /// Playlists are buffered by the caller, so the timeout covers the whole
    /// exchange. Segments and keys are streamed: the timeout only bounds the
    /// wait for response headers, and the client's read timeout catches a
    /// body that stalls.
    ///
    /// # Errors
    /// - [`RelayError::Forbidden`] when the policy rejects `url` (no request is made)
    /// - [`RelayError::UpstreamStatus`] for non-2xx responses
    /// - [`RelayError::UpstreamTimeout`] when headers do not arrive in time
    /// - [`RelayError::UpstreamRequest`] for other network failures
    pub async fn fetch(&self, url: &str, resource: Resource) -> Result<(Url, Response)> {
        let Some(target) = self.policy.permitted_url(url) else {
            return Err(RelayError::Forbidden(url.to_string()));
        };

        info!("Fetching {} from upstream: {}", resource, target);

        let request = self.client.get(target.clone());
        let response = match resource {
            Resource::Playlist => request.timeout(self.timeout).send().await?,
            Resource::Segment | Resource::Key => {
                match tokio::time::timeout(self.timeout, request.send()).await {
                    Ok(sent) => sent?,
                    Err(_) => {
                        return Err(RelayError::UpstreamTimeout {
                            resource,
                            after: self.timeout,
                        });
                    }
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus { resource, status });
        }

        Ok((target, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(host: &str) -> Config {
        Config {
            upstream_host: host.to_string(),
            upstream_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }

    #[test]
    fn browser_headers_match_fixed_set() {
        let headers = browser_headers(&Config::default()).unwrap();

        assert_eq!(headers.len(), 6);
        assert_eq!(headers["sec-ch-ua-platform"], "\"macOS\"");
        assert_eq!(headers["referer"], "https://www.braflix.gd/");
        assert_eq!(
            headers["user-agent"],
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36"
        );
        assert_eq!(
            headers["sec-ch-ua"],
            "\"Google Chrome\";v=\"129\", \"Not=A?Brand\";v=\"8\", \"Chromium\";v=\"129\""
        );
        assert_eq!(headers["dnt"], "1");
        assert_eq!(headers["sec-ch-ua-mobile"], "?0");
    }

    #[test]
    fn invalid_referer_is_rejected() {
        let config = Config {
            upstream_referer: "bad\nvalue".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            browser_headers(&config),
            Err(RelayError::InvalidHeader(_))
        ));
    }

    #[test]
    fn resource_labels() {
        assert_eq!(Resource::Playlist.to_string(), "m3u8 file");
        assert_eq!(Resource::Segment.content_type(), "video/MP2T");
        assert_eq!(Resource::Key.content_type(), "application/octet-stream");
        assert_eq!(Resource::Key.route(), "key");
    }

    #[tokio::test]
    async fn forbidden_url_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let upstream = Upstream::new(&config_for("allowed.example")).unwrap();
        let result = upstream
            .fetch(&format!("{}/playlist.m3u8", server.uri()), Resource::Playlist)
            .await;

        assert!(matches!(result, Err(RelayError::Forbidden(_))));
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg1.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 188]))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = Upstream::new(&config_for("127.0.0.1")).unwrap();
        let (url, response) = upstream
            .fetch(&format!("{}/seg1.ts", server.uri()), Resource::Segment)
            .await
            .unwrap();
        assert_eq!(url.path(), "/seg1.ts");
        assert_eq!(response.bytes().await.unwrap().len(), 188);

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        assert_eq!(headers["user-agent"], crate::config::DEFAULT_USER_AGENT);
        assert_eq!(headers["referer"], crate::config::DEFAULT_REFERER);
        assert_eq!(headers["sec-ch-ua"], SEC_CH_UA);
        assert_eq!(headers["sec-ch-ua-platform"], SEC_CH_UA_PLATFORM);
        assert_eq!(headers["sec-ch-ua-mobile"], SEC_CH_UA_MOBILE);
        assert_eq!(headers["dnt"], DNT);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let upstream = Upstream::new(&config_for("127.0.0.1")).unwrap();
        let result = upstream
            .fetch(&format!("{}/missing.m3u8", server.uri()), Resource::Playlist)
            .await;

        match result {
            Err(RelayError::UpstreamStatus { resource, status }) => {
                assert_eq!(resource, Resource::Playlist);
                assert_eq!(status.as_u16(), 404);
            }
            other => panic!("expected UpstreamStatus, got {:?}", other.map(|(u, _)| u)),
        }
    }

    #[tokio::test]
    async fn redirect_off_the_allowed_host_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/playlist.m3u8"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "http://evil.example/x.m3u8"),
            )
            .mount(&server)
            .await;

        let upstream = Upstream::new(&config_for("127.0.0.1")).unwrap();
        let result = upstream
            .fetch(&format!("{}/playlist.m3u8", server.uri()), Resource::Playlist)
            .await;

        assert!(matches!(
            result,
            Err(RelayError::UpstreamStatus { status, .. }) if status.as_u16() == 302
        ));
    }

    #[tokio::test]
    async fn redirect_on_the_allowed_host_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.m3u8"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/new.m3u8", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let upstream = Upstream::new(&config_for("127.0.0.1")).unwrap();
        let (url, response) = upstream
            .fetch(&format!("{}/old.m3u8", server.uri()), Resource::Playlist)
            .await
            .unwrap();

        // Resolution context stays the requested URL
        assert_eq!(url.path(), "/old.m3u8");
        assert_eq!(response.text().await.unwrap(), "#EXTM3U\n");
    }
}
