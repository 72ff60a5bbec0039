//! Upstream fetcher.
//!
//! Performs the outbound request for one proxied URL:
//!
//! 1. Validates the target with the SSRF guard (bare hosts get `http://`).
//! 2. Builds a fresh outbound header set from the client's headers, minus
//!    anything that leaks proxy topology or a content policy, plus browser
//!    defaults the client did not send.
//! 3. Follows redirects itself, at most [`MAX_REDIRECTS`] hops, validating
//!    every hop against the SSRF guard.
//! 4. Strips framing, encoding and policy headers from the final response.
//!
//! The network call sits behind the [`Transport`] trait; [`HttpTransport`]
//! is the reqwest implementation with transport-level redirects disabled.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, LOCATION,
    USER_AGENT,
};
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::config::ProxyConfig;
use crate::csp::is_csp_header;
use crate::error::FetchError;
use crate::safety::{normalize_target, safe_url};
use crate::url::absolutify;

/// Redirect hops followed before the last response is returned as-is.
pub const MAX_REDIRECTS: usize = 10;

/// Inbound request headers never forwarded upstream.
const DROPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "origin",
    "referer",
    "connection",
    "keep-alive",
    "proxy-connection",
    "upgrade",
    "te",
    "transfer-encoding",
    "content-length",
];

/// Upstream response headers never forwarded to the client.
const DROPPED_RESPONSE_HEADERS: &[&str] = &[
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "connection",
    "keep-alive",
];

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// One request as sent to the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Response from the upstream, after redirects.
pub struct UpstreamResponse {
    /// URL that produced this response (the last redirect hop).
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Buffer a body stream completely.
pub async fn read_body(mut body: BodyStream) -> Result<Bytes, FetchError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sends a single request.  Implementations must not follow redirects.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, FetchError>> + Send;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `timeout` bounds connecting and each wait for more bytes, not the
    /// whole transfer.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, FetchError> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|source| FetchError::Upstream {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::Body))
            .boxed();

        Ok(UpstreamResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Redirect-following, header-sanitizing upstream client.
#[derive(Debug, Clone)]
pub struct Fetcher<T = HttpTransport> {
    transport: T,
}

impl Fetcher<HttpTransport> {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, FetchError> {
        Ok(Self::new(HttpTransport::new(config.upstream_timeout)?))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch `target` on behalf of a client.
    ///
    /// `body` is forwarded only for methods other than GET and HEAD.
    pub async fn fetch(
        &self,
        method: Method,
        target: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, FetchError> {
        let mut url = normalize_target(target)
            .ok_or_else(|| FetchError::InvalidTarget(target.to_string()))?;
        let headers = outbound_headers(inbound_headers);
        let mut body = carries_body(&method).then_some(body);
        let mut method = method;
        let mut redirects = 0;

        loop {
            let mut response = self
                .transport
                .send(OutboundRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers: headers.clone(),
                    body: body.clone(),
                })
                .await?;

            let Some(location) = redirect_location(&response) else {
                sanitize_response_headers(&mut response.headers);
                return Ok(response);
            };

            if redirects >= MAX_REDIRECTS {
                warn!("redirect limit reached at {}, returning last response", url);
                sanitize_response_headers(&mut response.headers);
                return Ok(response);
            }

            let resolved = absolutify(&location, url.as_str());
            let Some(next) = safe_url(&resolved) else {
                warn!("blocked redirect from {} to {}", url, resolved);
                return Err(FetchError::BlockedRedirect(resolved));
            };

            redirects += 1;
            if switches_to_get(response.status, &method) {
                method = Method::GET;
                body = None;
            }
            debug!("redirect {}/{}: {} -> {}", redirects, MAX_REDIRECTS, url, next);
            url = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Header handling
// ---------------------------------------------------------------------------

/// Browser-like defaults, built fresh for every request.
fn default_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/124.0 Safari/537.36",
            ),
        ),
        (
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        ),
        (ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9")),
        (ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br")),
    ]
}

/// Client headers as forwarded upstream.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);
    for (name, value) in inbound {
        let name_str = name.as_str();
        if DROPPED_REQUEST_HEADERS.contains(&name_str) || is_csp_header(name_str) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    for (name, value) in default_headers() {
        if !headers.contains_key(&name) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Remove framing, encoding and policy headers from an upstream response.
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            DROPPED_RESPONSE_HEADERS.contains(&name.as_str()) || is_csp_header(name.as_str())
        })
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(name);
    }
}

fn carries_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn redirect_location(response: &UpstreamResponse) -> Option<String> {
    if !is_redirect(response.status) {
        return None;
    }
    response
        .headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 303 always becomes GET; 301/302 turn a POST into GET.  307/308 keep
/// method and body.
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status.as_u16() {
        303 => *method != Method::HEAD,
        301 | 302 => *method == Method::POST,
        _ => false,
    }
}
