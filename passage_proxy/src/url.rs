// passage_proxy::url
//
// URL proxification codec.  Every URL that flows through a rewriter is
// converted into a proxy-routable form so the browser always talks through
// our endpoint.
//
// Encoding scheme:  /proxy?q=<encodeURIComponent(original)>
//
// Left untouched (never routed through the proxy):
//   fragment        #top
//   pseudo-schemes  about:, data:, blob:, mailto:, javascript:
//   placeholders    {{ template }}, *wildcard
//   already proxied /proxy?q=...
//
// The client runtime patch (runtime.js) mirrors these rules exactly so a
// URL rewritten here is never encoded a second time in the browser.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{form_urlencoded, Url};

/// Path of the single proxy endpoint.
pub const PROXY_PATH: &str = "/proxy";

/// Query parameter carrying the target URL.
pub const PROXY_PARAM: &str = "q";

pub(crate) const PROXY_PREFIX: &str = "/proxy?q=";

/// Same set JavaScript's `encodeURIComponent` leaves unescaped.
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) const PASSTHROUGH_SCHEMES: &[&str] = &["about:", "data:", "blob:", "mailto:", "javascript:"];

/// True for URLs that must never be routed through the proxy.
pub fn is_passthrough(url: &str) -> bool {
    if url.starts_with('#') || url.starts_with('{') || url.starts_with('*') {
        return true;
    }
    if url.contains(PROXY_PREFIX) {
        return true;
    }
    PASSTHROUGH_SCHEMES.iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

/// Route a URL through the proxy endpoint.
///
/// Idempotent: a value that already points at the proxy is returned as-is.
pub fn proxify(url: &str) -> String {
    if is_passthrough(url) {
        return url.to_string();
    }
    format!("{}{}", PROXY_PREFIX, utf8_percent_encode(url, COMPONENT_ENCODE_SET))
}

/// Resolve `url` against `base`.
///
/// Absolute input is returned normalized; relative input is joined onto the
/// base.  If neither works the input comes back unchanged.
pub fn absolutify(url: &str, base: &str) -> String {
    if let Ok(absolute) = Url::parse(url) {
        return absolute.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(url)) {
        Ok(joined) => joined.to_string(),
        Err(_) => url.to_string(),
    }
}

/// Resolve and proxify a URL discovered inside rewritten content.
///
/// Pseudo-scheme and placeholder checks run on the raw value, before
/// resolution would turn e.g. `{{ slot }}` into a path under the base.
pub fn rewrite_url(raw: &str, base: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_passthrough(trimmed) {
        return raw.to_string();
    }
    proxify(&absolutify(trimmed, base))
}

/// Extract the target from a raw `/proxy` query string.
///
/// Returns `None` when `q` is absent or empty.
pub fn target_from_query(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == PROXY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Undo [`proxify`] on a proxy URL.  Non-proxy input yields `None`.
#[cfg(test)]
pub(crate) fn unproxify(proxied: &str) -> Option<String> {
    let encoded = proxied.strip_prefix(PROXY_PREFIX)?;
    percent_encoding::percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
