// passage_proxy::html
//
// HTML rewriter.  Parses the document with html5ever / kuchikiki and
// rewrites every URL-bearing attribute, inline `<script>` and `<style>`
// body, inline style attribute, srcset, and meta refresh so that all
// traffic flows through the proxy.  Policies set through
// `<meta http-equiv="Content-Security-Policy">` are removed, and so is
// `<base href>` once it has been applied to resolution.
//
// html5ever follows the HTML5 error-recovery rules, so every input parses
// to some tree; the only failure left is serialization.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use kuchikiki::traits::*;
use kuchikiki::{parse_html, Attributes, NodeRef};
use log::{debug, warn};
use url::Url;

use crate::css::rewrite_css;
use crate::csp::is_csp_meta;
use crate::error::RewriteError;
use crate::js::rewrite_js;
use crate::url::{absolutify, rewrite_url};

// ---------------------------------------------------------------------------
// URL-bearing attributes
// ---------------------------------------------------------------------------

/// Attribute → elements on which it holds a single URL.
const URL_ATTRS: &[(&str, &[&str])] = &[
    (
        "src",
        &[
            "script", "img", "video", "embed", "iframe", "audio", "input", "source", "track",
        ],
    ),
    ("href", &["link", "a", "area"]),
    ("poster", &["video"]),
    ("data", &["object"]),
    ("action", &["form"]),
];

/// Attributes holding a comma-separated list of `url descriptor` candidates.
const SRCSET_ATTRS: &[&str] = &["srcset", "imagesrcset"];

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Rewrite a full HTML document so every URL routes through the proxy.
///
/// * `html`     – raw HTML source
/// * `base_url` – the final fetched URL (for resolving relative paths)
pub fn rewrite_html(html: &str, base_url: &str) -> Result<String, RewriteError> {
    let doc = parse_html().one(html);

    // <base href> overrides the page URL for relative resolution.
    let base = find_base_href(&doc)
        .map(|href| absolutify(&href, base_url))
        .unwrap_or_else(|| base_url.to_string());
    let page = Page {
        host: Url::parse(&base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default(),
        base,
    };

    // Snapshot first: rewriting replaces script/style children.
    let nodes: Vec<NodeRef> = doc.inclusive_descendants().collect();
    let mut removed = 0;
    for node in &nodes {
        if page.rewrite_element(node) == Action::Remove {
            node.detach();
            removed += 1;
        }
    }
    if removed > 0 {
        debug!("html: removed {} CSP meta / base element(s)", removed);
    }

    let mut buf = Vec::new();
    serialize(
        &mut buf,
        &doc,
        SerializeOpts {
            scripting_enabled: true,
            traversal_scope: TraversalScope::IncludeNode,
            create_missing_parent: false,
        },
    )?;

    String::from_utf8(buf)
        .map_err(|e| RewriteError::Serialize(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

// ---------------------------------------------------------------------------
// Element walker
// ---------------------------------------------------------------------------

struct Page {
    base: String,
    host: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Keep,
    Remove,
}

impl Page {
    fn rewrite_element(&self, node: &NodeRef) -> Action {
        let Some(el) = node.as_element() else {
            return Action::Keep;
        };
        let tag: &str = &el.name.local;

        {
            let mut attrs = el.attributes.borrow_mut();

            if tag == "meta" && attrs.get("http-equiv").is_some_and(is_csp_meta) {
                return Action::Remove;
            }

            // Already folded into `self.base`; left in place it would resolve
            // every `/proxy?q=` value against the upstream origin.
            if tag == "base" && attrs.contains("href") {
                return Action::Remove;
            }

            self.rewrite_url_attrs(tag, &mut attrs);

            for &attr in SRCSET_ATTRS {
                if let Some(val) = attrs.get(attr).map(str::to_string) {
                    attrs.insert(attr, self.rewrite_srcset(&val));
                }
            }

            if let Some(style) = attrs.get("style").map(str::to_string) {
                attrs.insert("style", rewrite_css(&style, &self.base));
            }

            if tag == "meta" {
                self.rewrite_meta_refresh(&mut attrs);
            }
        }

        match tag {
            "script" => {
                let attrs = el.attributes.borrow();
                let inline = !attrs.contains("src");
                let js = is_javascript_type(attrs.get("type"));
                drop(attrs);
                if inline && js {
                    self.rewrite_inline_script(node);
                }
            }
            "style" => {
                let css = node.text_contents();
                if !css.is_empty() {
                    replace_text(node, &rewrite_css(&css, &self.base));
                }
            }
            _ => {}
        }

        Action::Keep
    }

    fn rewrite_url_attrs(&self, tag: &str, attrs: &mut Attributes) {
        for &(attr, tags) in URL_ATTRS {
            if !tags.contains(&tag) {
                continue;
            }
            if let Some(val) = attrs.get(attr).map(str::to_string) {
                if !val.trim().is_empty() {
                    attrs.insert(attr, rewrite_url(&val, &self.base));
                }
            }
        }
    }

    /// Parse and rewrite a `srcset` value.  Format:
    ///   url1 1x, url2 2x, url3 300w
    fn rewrite_srcset(&self, srcset: &str) -> String {
        srcset
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                match entry.split_once(char::is_whitespace) {
                    Some((url, descriptor)) => {
                        format!("{} {}", rewrite_url(url, &self.base), descriptor.trim())
                    }
                    None => rewrite_url(entry, &self.base),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `<meta http-equiv="refresh" content="0;url=…">`
    fn rewrite_meta_refresh(&self, attrs: &mut Attributes) {
        let is_refresh = attrs
            .get("http-equiv")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"));
        if !is_refresh {
            return;
        }

        if let Some(content) = attrs.get("content").map(str::to_string) {
            if let Some(idx) = content.to_ascii_lowercase().find("url=") {
                let (prefix, target) = content.split_at(idx + 4);
                let target = target.trim().trim_matches(|c| c == '\'' || c == '"');
                let rewritten = format!("{}{}", prefix, rewrite_url(target, &self.base));
                attrs.insert("content", rewritten);
            }
        }
    }

    fn rewrite_inline_script(&self, node: &NodeRef) {
        let source = node.text_contents();
        if source.trim().is_empty() {
            return;
        }
        match rewrite_js(&source, &self.base, &self.host) {
            Ok(rewritten) if rewritten != source => replace_text(node, &rewritten),
            Ok(_) => {}
            Err(e) => warn!("inline script on {} left as-is: {}", self.host, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Inline scripts with these types are executed by the browser; anything
/// else (JSON data blocks, templates, …) is left alone.
fn is_javascript_type(ty: Option<&str>) -> bool {
    let Some(ty) = ty.map(str::trim) else {
        return true;
    };
    let ty = ty.to_ascii_lowercase();
    ty.is_empty() || ty == "module" || ty.contains("javascript") || ty.contains("ecmascript")
}

fn replace_text(node: &NodeRef, text: &str) {
    for child in node.children().collect::<Vec<_>>() {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

fn find_base_href(doc: &NodeRef) -> Option<String> {
    let base = doc.select_first("base[href]").ok()?;
    let attrs = base.attributes.borrow();
    let href = attrs.get("href")?.trim();
    if href.is_empty() {
        return None;
    }
    Some(href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::{proxify, unproxify};

    const BASE: &str = "http://ex.com/dir/page.html";

    fn rewrite(html: &str) -> String {
        rewrite_html(html, BASE).unwrap()
    }

    #[test]
    fn rewrites_img_src_relative_to_page() {
        let result = rewrite(r#"<img src="a.png">"#);
        let expected = format!(r#"<img src="{}">"#, proxify("http://ex.com/dir/a.png"));
        assert!(result.contains(&expected), "{}", result);
    }

    #[test]
    fn rewrites_attribute_table() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/s.css">
            <script src="app.js"></script>
        </head><body>
            <a href="https://other.org/p">x</a>
            <video src="v.mp4" poster="p.jpg"></video>
            <object data="o.swf"></object>
            <form action="/submit"></form>
            <area href="m.html"><iframe src="f.html"></iframe>
        </body></html>"#;
        let result = rewrite(html);
        for url in [
            "http://ex.com/s.css",
            "http://ex.com/dir/app.js",
            "https://other.org/p",
            "http://ex.com/dir/v.mp4",
            "http://ex.com/dir/p.jpg",
            "http://ex.com/dir/o.swf",
            "http://ex.com/submit",
            "http://ex.com/dir/m.html",
            "http://ex.com/dir/f.html",
        ] {
            assert!(result.contains(&proxify(url)), "missing {} in {}", url, result);
        }
    }

    #[test]
    fn attributes_outside_table_untouched() {
        let result = rewrite(r#"<div src="x.png" href="y"></div><img href="z">"#);
        assert!(result.contains(r#"src="x.png""#));
        assert!(result.contains(r#"href="y""#));
        assert!(result.contains(r#"href="z""#));
    }

    #[test]
    fn skips_empty_and_special_values() {
        let result = rewrite(
            r##"<a href="">e</a><a href="#top">t</a><a href="javascript:void(0)">j</a><img src="data:image/gif;base64,R0">"##,
        );
        assert!(result.contains(r#"href="""#));
        assert!(result.contains(r##"href="#top""##));
        assert!(result.contains(r#"href="javascript:void(0)""#));
        assert!(result.contains(r#"src="data:image/gif;base64,R0""#));
    }

    #[test]
    fn rewrites_inline_script_and_style() {
        let html = r#"<head><style>body{background:url(bg.png)}</style></head>
            <body><script>fetch("/api"); window.location.href;</script></body>"#;
        let result = rewrite(html);
        assert!(result.contains(&proxify("http://ex.com/dir/bg.png")));
        assert!(result.contains(&proxify("http://ex.com/api")));
        assert!(result.contains("window.proxyLocation.href"));
    }

    #[test]
    fn broken_inline_script_is_kept() {
        let html = "<script>function ( { fetch('x')</script>";
        let result = rewrite(html);
        assert!(result.contains("function ( { fetch('x')"));
    }

    #[test]
    fn json_script_blocks_are_left_alone() {
        let html = r#"<script type="application/ld+json">{"url": "http://ex.com/dir/page.html"}</script>"#;
        let result = rewrite(html);
        assert!(result.contains(r#"{"url": "http://ex.com/dir/page.html"}"#));
    }

    #[test]
    fn removes_csp_meta() {
        let html = r#"<head><meta http-equiv="Content-Security-Policy" content="default-src 'none'"><meta charset="utf-8"></head>"#;
        let result = rewrite(html);
        assert!(!result.contains("Content-Security-Policy"));
        assert!(result.contains(r#"<meta charset="utf-8">"#));
    }

    #[test]
    fn rewrites_srcset() {
        let result = rewrite(r#"<img srcset="a.png 1x, /b.png 2x">"#);
        let expected = format!(
            "{} 1x, {} 2x",
            proxify("http://ex.com/dir/a.png"),
            proxify("http://ex.com/b.png")
        );
        assert!(result.contains(&expected), "{}", result);
    }

    #[test]
    fn rewrites_meta_refresh() {
        let result = rewrite(r#"<meta http-equiv="refresh" content="5;url=/next">"#);
        assert!(result.contains(&format!("5;url={}", proxify("http://ex.com/next"))));
    }

    #[test]
    fn rewrites_style_attribute() {
        let result = rewrite(r#"<div style="background:url('k.png')"></div>"#);
        assert!(result.contains(&proxify("http://ex.com/dir/k.png")));
    }

    #[test]
    fn base_href_overrides_page_url() {
        let html = r#"<head><base href="https://cdn.ex.com/assets/"></head><img src="i.png">"#;
        let result = rewrite(html);
        assert!(result.contains(&proxify("https://cdn.ex.com/assets/i.png")));
        assert!(!result.contains("<base"), "{}", result);
    }

    #[test]
    fn base_without_href_is_kept() {
        let result = rewrite(r#"<head><base target="_blank"></head><a href="x">x</a>"#);
        assert!(result.contains(r#"<base target="_blank">"#));
        assert!(result.contains(&proxify("http://ex.com/dir/x")));
    }

    #[test]
    fn proxied_values_decode_back() {
        let result = rewrite(r#"<a href="q?a=1&amp;b=2">x</a>"#);
        let start = result.find("href=\"").unwrap() + 6;
        let end = start + result[start..].find('"').unwrap();
        assert_eq!(
            unproxify(&result[start..end]).as_deref(),
            Some("http://ex.com/dir/q?a=1&b=2")
        );
    }

    #[test]
    fn malformed_markup_still_serializes() {
        let result = rewrite("<div><p>unclosed <b>bold</div></i>");
        assert!(result.contains("unclosed"));
        assert!(result.contains("bold"));
    }
}
