//! Process configuration.
//!
//! Read once at startup from the environment:
//!
//! | Variable                | Default   |
//! |-------------------------|-----------|
//! | `HOST`                  | `0.0.0.0` |
//! | `PORT`                  | `8080`    |
//! | `UPSTREAM_TIMEOUT_SECS` | `30`      |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default listen address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bound on connecting to the upstream and on each read stall.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Connect timeout and idle-read timeout for upstream requests.
    pub upstream_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.  Unparseable values fall back to
    /// the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(defaults.host),
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            upstream_timeout: Duration::from_secs(parse_or(
                "UPSTREAM_TIMEOUT_SECS",
                lookup("UPSTREAM_TIMEOUT_SECS"),
                defaults.upstream_timeout.as_secs(),
            )),
        }
    }

    /// Socket address to listen on.
    pub fn listen_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ProxyConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
    }

    #[test]
    fn reads_overrides() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("UPSTREAM_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = ProxyConfig::from_lookup(lookup(&[("PORT", "eighty"), ("UPSTREAM_TIMEOUT_SECS", "-1")]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
    }
}
