//! In-memory transport for exercising the fetcher and handler without a
//! network.

use std::sync::Mutex;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;

use crate::error::FetchError;
use crate::fetch::{OutboundRequest, Transport, UpstreamResponse};

/// Canned upstream reply.
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    pub fn ok(content_type: &str, body: &str) -> Self {
        Self::status(200).header(CONTENT_TYPE.as_str(), content_type).body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).header(LOCATION.as_str(), location)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }
}

type Script = dyn Fn(&OutboundRequest, usize) -> Reply + Send + Sync;

/// Answers each request by calling a closure with the request and its
/// zero-based index, and records every request it saw.
pub struct ScriptedTransport {
    script: Box<Script>,
    calls: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: impl Fn(&OutboundRequest, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, FetchError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        let reply = (self.script)(&request, index);
        let body = reply.body;
        Ok(UpstreamResponse {
            url: request.url,
            status: reply.status,
            headers: reply.headers,
            body: futures_util::stream::iter([Ok::<_, FetchError>(body)]).boxed(),
        })
    }
}
