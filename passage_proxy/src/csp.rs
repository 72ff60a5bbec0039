// passage_proxy::csp
//
// Content-Security-Policy neutralization.
//
// An origin's policy would block the injected runtime patch and every
// rewritten `/proxy?q=…` URL, so the proxy removes it wherever it appears:
//
//   response headers   stripped by the fetcher (and never forwarded upstream)
//   <meta http-equiv>  removed by the HTML rewriter

/// Header names that carry a content security policy.
pub const CSP_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-content-security-policy",
    "x-webkit-csp",
];

/// True for any CSP-related header name (case-insensitive).
pub fn is_csp_header(name: &str) -> bool {
    CSP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// True for the `http-equiv` value of a `<meta>` that sets a policy.
pub fn is_csp_meta(http_equiv: &str) -> bool {
    is_csp_header(http_equiv.trim())
}
