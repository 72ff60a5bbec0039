// passage_proxy::dispatch
//
// Content dispatcher.  Looks at the fetched response's content type (and
// the final URL's extension) and routes the body to the matching rewriter:
//
//   text/html                    → html rewriter + runtime patch before </head>
//   text/css      or *.css       → css rewriter,  Content-Type: text/css
//   *javascript*  or *.js        → js rewriter,   runtime patch prepended,
//                                  Content-Type: application/javascript
//   anything else                → streamed through untouched
//
// A JavaScript parse failure degrades to the original text; only an HTML
// serialization failure or a body read error fails the request.

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use url::Url;

use crate::css::rewrite_css;
use crate::error::ProxyError;
use crate::fetch::{is_redirect, read_body, BodyStream, UpstreamResponse};
use crate::html::rewrite_html;
use crate::js::rewrite_js;
use crate::runtime::{inject_before_head_close, prepend_to_script};
use crate::url::rewrite_url;

/// Which rewriter a response body goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    JavaScript,
}

/// Pick the rewriter for a response; `None` means stream it unmodified.
pub fn classify(content_type: &str, url: &Url) -> Option<ContentKind> {
    let content_type = content_type.to_ascii_lowercase();
    let path = url.path();
    if content_type.contains("text/html") {
        Some(ContentKind::Html)
    } else if content_type.contains("text/css") || path.ends_with(".css") {
        Some(ContentKind::Css)
    } else if content_type.contains("javascript") || path.ends_with(".js") {
        Some(ContentKind::JavaScript)
    } else {
        None
    }
}

/// Response body ready for the client.
pub enum ProxiedBody {
    Text(String),
    Stream(BodyStream),
}

/// Response ready for the client.
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ProxiedBody,
}

/// Rewrite a fetched response for the client.
pub async fn render(response: UpstreamResponse) -> Result<ProxiedResponse, ProxyError> {
    let UpstreamResponse {
        url,
        status,
        mut headers,
        body,
    } = response;

    // Only reached when the redirect cap was hit; keep the browser on the proxy.
    if is_redirect(status) {
        rewrite_location(&mut headers, url.as_str());
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(kind) = classify(content_type, &url) else {
        debug!("{} {} streamed through", status.as_u16(), url);
        return Ok(ProxiedResponse {
            status,
            headers,
            body: ProxiedBody::Stream(body),
        });
    };
    debug!("{} {} -> {:?}", status.as_u16(), url, kind);

    let bytes = read_body(body).await?;
    let text = String::from_utf8_lossy(&bytes);
    let base = url.as_str();

    let rewritten = match kind {
        ContentKind::Html => inject_before_head_close(&rewrite_html(&text, base)?, base),
        ContentKind::Css => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/css"));
            rewrite_css(&text, base)
        }
        ContentKind::JavaScript => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/javascript"),
            );
            let host = url.host_str().unwrap_or_default();
            let js = rewrite_js(&text, base, host).unwrap_or_else(|e| {
                warn!("serving {} unrewritten: {}", url, e);
                text.to_string()
            });
            prepend_to_script(&js, base)
        }
    };

    Ok(ProxiedResponse {
        status,
        headers,
        body: ProxiedBody::Text(rewritten),
    })
}

fn rewrite_location(headers: &mut HeaderMap, base: &str) {
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let proxied = rewrite_url(location, base);
    if let Ok(value) = HeaderValue::from_str(&proxied) {
        headers.insert(LOCATION, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetcher;
    use crate::runtime::CLIENT_RUNTIME;
    use crate::testing::{Reply, ScriptedTransport};
    use crate::url::proxify;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn upstream(url: &str, status: u16, content_type: Option<&str>, body: &'static [u8]) -> UpstreamResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        UpstreamResponse {
            url: Url::parse(url).unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: futures_util::stream::iter([Ok(Bytes::from_static(body))]).boxed(),
        }
    }

    async fn text(response: ProxiedResponse) -> String {
        match response.body {
            ProxiedBody::Text(t) => t,
            ProxiedBody::Stream(s) => String::from_utf8(read_body(s).await.unwrap().to_vec()).unwrap(),
        }
    }

    #[test]
    fn classifies_by_type_then_extension() {
        let page = Url::parse("http://ex.com/index").unwrap();
        let css = Url::parse("http://ex.com/site.css?v=2").unwrap();
        let js = Url::parse("http://ex.com/app.js").unwrap();
        assert_eq!(classify("text/html; charset=utf-8", &page), Some(ContentKind::Html));
        assert_eq!(classify("TEXT/CSS", &page), Some(ContentKind::Css));
        assert_eq!(classify("text/plain", &css), Some(ContentKind::Css));
        assert_eq!(
            classify("application/x-javascript", &page),
            Some(ContentKind::JavaScript)
        );
        assert_eq!(classify("", &js), Some(ContentKind::JavaScript));
        assert_eq!(classify("image/png", &page), None);
    }

    #[tokio::test]
    async fn html_gets_runtime_before_head_close() {
        let response = upstream(
            "http://ex.com/dir/page.html",
            200,
            Some("text/html"),
            br#"<html><head><title>t</title></head><body><img src="a.png"></body></html>"#,
        );
        let body = text(render(response).await.unwrap()).await;
        let script_at = body.find(CLIENT_RUNTIME).unwrap();
        let head_close = body.find("</head>").unwrap();
        assert!(script_at < head_close);
        assert!(body.contains(&proxify("http://ex.com/dir/a.png")));
    }

    #[tokio::test]
    async fn runtime_base_is_final_url_after_redirects() {
        let transport = ScriptedTransport::new(|_, n| match n {
            0 => Reply::redirect(301, "https://www.ex.com/app/"),
            _ => Reply::ok("text/html", "<html><head></head><body></body></html>"),
        });
        let fetched = Fetcher::new(transport)
            .fetch(reqwest::Method::GET, "ex.com", &HeaderMap::new(), Bytes::new())
            .await
            .unwrap();
        let body = text(render(fetched).await.unwrap()).await;
        assert!(
            body.contains(r#"globalThis.__passageBase = "https://www.ex.com/app/";"#),
            "{}",
            body
        );
    }

    #[tokio::test]
    async fn css_by_extension_forces_content_type() {
        let response = upstream("http://ex.com/s/site.css", 200, Some("text/plain"), b"a{background:url(x.png)}");
        let rendered = render(response).await.unwrap();
        assert_eq!(rendered.headers.get(CONTENT_TYPE).unwrap(), "text/css");
        let body = text(rendered).await;
        assert_eq!(body, format!("a{{background:url({})}}", proxify("http://ex.com/s/x.png")));
    }

    #[tokio::test]
    async fn javascript_gets_runtime_prepended() {
        let response = upstream("http://ex.com/app.js", 200, None, b"fetch('/api');");
        let rendered = render(response).await.unwrap();
        assert_eq!(
            rendered.headers.get(CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
        let body = text(rendered).await;
        let runtime_at = body.find(CLIENT_RUNTIME).unwrap();
        let base_at = body.find(r#""http://ex.com/app.js""#).unwrap();
        assert!(base_at < runtime_at);
        assert!(body.ends_with(&format!("fetch('{}');", proxify("http://ex.com/api"))));
    }

    #[tokio::test]
    async fn broken_javascript_served_unrewritten() {
        let response = upstream("http://ex.com/app.js", 200, Some("text/javascript"), b"fetch('/api'");
        let body = text(render(response).await.unwrap()).await;
        assert!(body.ends_with("\nfetch('/api'"));
    }

    #[tokio::test]
    async fn binary_streams_through() {
        let png: &'static [u8] = &[0x89, b'P', b'N', b'G', 0, 0xff];
        let response = upstream("http://ex.com/i.png", 206, Some("image/png"), png);
        let rendered = render(response).await.unwrap();
        assert_eq!(rendered.status, StatusCode::PARTIAL_CONTENT);
        let ProxiedBody::Stream(stream) = rendered.body else {
            panic!("expected a streamed body");
        };
        assert_eq!(read_body(stream).await.unwrap(), Bytes::from_static(png));
    }

    #[tokio::test]
    async fn capped_redirect_location_stays_on_proxy() {
        let mut response = upstream("http://ex.com/a/b", 302, None, b"");
        response
            .headers
            .insert(LOCATION, HeaderValue::from_static("../next"));
        let rendered = render(response).await.unwrap();
        assert_eq!(rendered.status, StatusCode::FOUND);
        assert_eq!(
            rendered.headers.get(LOCATION).unwrap().to_str().unwrap(),
            proxify("http://ex.com/next")
        );
    }
}
