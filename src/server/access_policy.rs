use url::Url;

/// Single-host allow-list guarding every upstream fetch.
///
/// A URL is permitted only when it parses as an absolute URL whose hostname
/// equals the configured host. Hostnames compare case-insensitively; the
/// scheme and port are not part of the match.
#[derive(Clone, Debug)]
pub struct AccessPolicy {
    allowed_host: String,
}

impl AccessPolicy {
    pub fn new(allowed_host: impl Into<String>) -> Self {
        Self {
            allowed_host: allowed_host.into(),
        }
    }

    /// Returns `true` if the relay may fetch `url`.
    pub fn is_permitted(&self, url: &str) -> bool {
        self.permitted_url(url).is_some()
    }

    /// Parse `url` and return it only if the policy accepts it.
    pub fn permitted_url(&self, url: &str) -> Option<Url> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        host.eq_ignore_ascii_case(&self.allowed_host)
            .then_some(parsed)
    }
}
