// passage_proxy::safety
//
// SSRF guard.  Decides whether a URL may be fetched by the proxy at all.
//
// Rules:
//   scheme          http / https only
//   IP literal      rejected when private, loopback, link-local or
//                   unspecified (v4 and v6, including v4-mapped v6)
//   host name       rejected only for `localhost`
//
// Host names are NOT resolved.  A public name whose DNS record points at a
// private address passes this check; connect-time filtering would be needed
// to close that gap.
//
// `url::Url` normalizes alternate IPv4 spellings (`0x7f.1`, `2130706433`,
// `127.1`) into a real `Host::Ipv4`, so those cannot sneak past as names.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Parse `candidate` and return it only if it is safe to fetch.
pub fn safe_url(candidate: &str) -> Option<Url> {
    let url = Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let allowed = match url.host()? {
        Host::Ipv4(ip) => !is_internal_ipv4(ip),
        Host::Ipv6(ip) => !is_internal_ipv6(ip),
        Host::Domain(name) => !is_localhost(name),
    };
    allowed.then_some(url)
}

/// Pure predicate form of [`safe_url`].
pub fn is_safe(candidate: &str) -> bool {
    safe_url(candidate).is_some()
}

/// Accept a `q` value as given, or as a bare host with `http://` prepended.
///
/// A value that already names a scheme is never re-prefixed; otherwise
/// `http://127.0.0.1/` would come back as host `http`.
pub fn normalize_target(candidate: &str) -> Option<Url> {
    let candidate = candidate.trim();
    if has_explicit_scheme(candidate) {
        return safe_url(candidate);
    }
    safe_url(&format!("http://{}", candidate))
}

/// True when `candidate` starts with `scheme://`.
fn has_explicit_scheme(candidate: &str) -> bool {
    let Some((scheme, _)) = candidate.split_once("://") else {
        return false;
    };
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_localhost(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    name.eq_ignore_ascii_case("localhost")
}

fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique-local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link-local fe80::/10
}
