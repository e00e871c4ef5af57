use std::env;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3008;
/// The single host the relay is allowed to fetch from
pub const DEFAULT_UPSTREAM_HOST: &str = "romeo.ilovephones.site";
/// Referer presented to the upstream host
pub const DEFAULT_REFERER: &str = "https://www.braflix.gd/";
/// User-Agent presented to the upstream host
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";
/// Upper bound for a single upstream request, body included
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Hostname every upstream URL must match
    pub upstream_host: String,
    pub upstream_referer: String,
    pub upstream_user_agent: String,
    pub upstream_timeout: Duration,
    /// Prefix for rewritten references. Empty keeps them relay-relative
    /// (`/proxy-ts?url=...`).
    pub public_base_url: String,
    /// Also route nested playlists of master playlists through the relay
    pub rewrite_variants: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upstream_host: DEFAULT_UPSTREAM_HOST.to_string(),
            upstream_referer: DEFAULT_REFERER.to_string(),
            upstream_user_agent: DEFAULT_USER_AGENT.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            public_base_url: String::new(),
            rewrite_variants: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset variables fall back to the defaults
    /// above. Set-but-invalid numeric values are errors.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let port = match env::var("PORT") {
            Ok(value) => value
                .parse()
                .map_err(|e| format!("Invalid PORT '{}': {}", value, e))?,
            Err(_) => DEFAULT_PORT,
        };

        let upstream_host = env::var("UPSTREAM_HOST")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_HOST.to_string())
            .trim()
            .to_ascii_lowercase();
        if upstream_host.is_empty() {
            return Err("UPSTREAM_HOST must not be empty".into());
        }

        let upstream_referer =
            env::var("UPSTREAM_REFERER").unwrap_or_else(|_| DEFAULT_REFERER.to_string());

        let upstream_user_agent =
            env::var("UPSTREAM_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        let timeout_secs: u64 = match env::var("UPSTREAM_TIMEOUT_SECS") {
            Ok(value) => value
                .parse()
                .map_err(|e| format!("Invalid UPSTREAM_TIMEOUT_SECS '{}': {}", value, e))?,
            Err(_) => DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err("UPSTREAM_TIMEOUT_SECS must be greater than zero".into());
        }

        // Trailing slash would double up with the route paths
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        let rewrite_variants = env::var("REWRITE_VARIANTS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        Ok(Config {
            port,
            upstream_host,
            upstream_referer,
            upstream_user_agent,
            upstream_timeout: Duration::from_secs(timeout_secs),
            public_base_url,
            rewrite_variants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "PORT",
        "UPSTREAM_HOST",
        "UPSTREAM_REFERER",
        "UPSTREAM_USER_AGENT",
        "UPSTREAM_TIMEOUT_SECS",
        "PUBLIC_BASE_URL",
        "REWRITE_VARIANTS",
    ];

    /// Set env vars, run `f`, then restore original state.
    ///
    /// Every variable in `ALL_VARS` not listed in `set` is removed first.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> = ALL_VARS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK; no other thread modifies env vars concurrently.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn defaults_when_unset() {
        with_env(&[], || {
            let config = Config::from_env().expect("defaults should load");
            assert_eq!(config.port, 3008);
            assert_eq!(config.upstream_host, "romeo.ilovephones.site");
            assert_eq!(config.upstream_referer, DEFAULT_REFERER);
            assert_eq!(config.upstream_user_agent, DEFAULT_USER_AGENT);
            assert_eq!(config.upstream_timeout, Duration::from_secs(30));
            assert_eq!(config.public_base_url, "");
            assert!(!config.rewrite_variants);
        });
    }

    #[test]
    fn port_override() {
        with_env(&[("PORT", "8080")], || {
            assert_eq!(Config::from_env().unwrap().port, 8080);
        });
    }

    #[test]
    fn invalid_port_is_error() {
        with_env(&[("PORT", "eighty")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn upstream_host_is_normalized() {
        with_env(&[("UPSTREAM_HOST", " Media.Example.COM ")], || {
            assert_eq!(
                Config::from_env().unwrap().upstream_host,
                "media.example.com"
            );
        });
    }

    #[test]
    fn empty_upstream_host_is_error() {
        with_env(&[("UPSTREAM_HOST", "  ")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn zero_timeout_is_error() {
        with_env(&[("UPSTREAM_TIMEOUT_SECS", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn public_base_url_trailing_slash_trimmed() {
        with_env(&[("PUBLIC_BASE_URL", "https://relay.example.com/")], || {
            assert_eq!(
                Config::from_env().unwrap().public_base_url,
                "https://relay.example.com"
            );
        });
    }

    #[test]
    fn rewrite_variants_enabled() {
        with_env(&[("REWRITE_VARIANTS", "true")], || {
            assert!(Config::from_env().unwrap().rewrite_variants);
        });
    }

    #[test]
    fn default_matches_from_env_defaults() {
        with_env(&[], || {
            let loaded = Config::from_env().unwrap();
            let default = Config::default();
            assert_eq!(loaded.port, default.port);
            assert_eq!(loaded.upstream_host, default.upstream_host);
            assert_eq!(loaded.upstream_timeout, default.upstream_timeout);
        });
    }
}
