// passage_proxy::server
//
// HTTP surface.  One route does all the work:
//
//   ANY /proxy?q=<target>   fetch target, rewrite by content type, respond
//   anything else           404 "Not found"
//
// Client request bodies are buffered (up to MAX_REQUEST_BODY) and forwarded
// for methods other than GET and HEAD.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::dispatch::{render, ProxiedBody, ProxiedResponse};
use crate::error::{ProxyError, ServeError};
use crate::fetch::{Fetcher, Transport};
use crate::url::{target_from_query, PROXY_PATH};

/// Largest client request body forwarded upstream.
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Build the proxy router around a shared fetcher.
pub fn router<T: Transport + 'static>(fetcher: Arc<Fetcher<T>>) -> Router {
    Router::new()
        .route(PROXY_PATH, any(proxy_handler::<T>))
        .fallback(not_found)
        .with_state(fetcher)
}

/// Bind the configured address and serve until the listener fails.
pub async fn serve(config: ProxyConfig) -> Result<(), ServeError> {
    let addr = config.listen_addr().map_err(|source| ServeError::Address {
        addr: format!("{}:{}", config.host, config.port),
        source,
    })?;
    let fetcher = Arc::new(Fetcher::from_config(&config)?);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(
        "passage proxy listening on http://{} (upstream timeout {}s)",
        addr,
        config.upstream_timeout.as_secs()
    );

    axum::serve(listener, router(fetcher)).await?;
    Ok(())
}

async fn proxy_handler<T: Transport + 'static>(
    State(fetcher): State<Arc<Fetcher<T>>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Result<ProxiedResponse, ProxyError> {
    let target = query
        .as_deref()
        .and_then(target_from_query)
        .ok_or(ProxyError::MissingQuery)?;

    let body = to_bytes(body, MAX_REQUEST_BODY).await.map_err(|e| {
        debug!("rejecting request body for {}: {}", target, e);
        ProxyError::BodyTooLarge
    })?;

    debug!("{} {}", method, target);
    let upstream = fetcher
        .fetch(method, &target, &headers, body)
        .await
        .map_err(|e| {
            warn!("fetch {} failed: {}", target, e);
            ProxyError::from(e)
        })?;

    render(upstream).await.map_err(|e| {
        error!("rewriting {} failed: {}", target, e);
        e
    })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ProxiedBody::Text(text) => Body::from(text),
            ProxiedBody::Stream(stream) => Body::from_stream(stream),
        };
        (self.status, self.headers, body).into_response()
    }
}
