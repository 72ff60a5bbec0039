//! Error types for the passage proxy.
//!
//! Three layers, each with its own enum:
//! - [`RewriteError`]: a rewriter could not process its input. Parse errors
//!   are recovered locally by serving the original text.
//! - [`FetchError`]: target validation or the upstream exchange failed.
//! - [`ProxyError`]: what the HTTP surface reports to the client.
//!
//! [`ServeError`] covers listener startup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures local to one content rewriter.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("{kind} parse failed: {reason}")]
    Parse { kind: &'static str, reason: String },

    #[error("serialization failed: {0}")]
    Serialize(#[from] std::io::Error),
}

/// Failures of the upstream fetcher.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid or blocked target: {0}")]
    InvalidTarget(String),

    #[error("redirect to blocked location: {0}")]
    BlockedRedirect(String),

    #[error("upstream request to {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream body read failed: {0}")]
    Body(#[source] reqwest::Error),

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors surfaced to proxy clients.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing 'q' query parameter")]
    MissingQuery,

    #[error("Invalid or blocked URL")]
    InvalidTarget,

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("Error fetching the URL")]
    UpstreamUnavailable(#[source] FetchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidTarget(_) | FetchError::BlockedRedirect(_) => {
                ProxyError::InvalidTarget
            }
            other => ProxyError::UpstreamUnavailable(other),
        }
    }
}

impl From<RewriteError> for ProxyError {
    fn from(err: RewriteError) -> Self {
        ProxyError::Internal(err.to_string())
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingQuery | ProxyError::InvalidTarget => StatusCode::BAD_REQUEST,
            ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::UpstreamUnavailable(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ProxyError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

/// Failures starting the listener.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("invalid listen address {addr}: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_match_http_surface() {
        assert_eq!(
            ProxyError::MissingQuery.to_string(),
            "Missing 'q' query parameter"
        );
        assert_eq!(ProxyError::InvalidTarget.to_string(), "Invalid or blocked URL");
    }

    #[test]
    fn blocked_redirect_maps_to_bad_request() {
        let err: ProxyError = FetchError::BlockedRedirect("http://10.0.0.1/".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn serialization_failure_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: ProxyError = RewriteError::Serialize(io).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
