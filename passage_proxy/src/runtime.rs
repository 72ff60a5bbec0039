// passage_proxy::runtime
//
// Client runtime patch.  A fixed script injected into every HTML page and
// prepended to every JavaScript response.  In the browser it keeps URLs
// built after load on the proxy:
//
//   XMLHttpRequest.prototype.open   url argument proxified
//   fetch                           string, URL and Request inputs
//   proxyImport(url)                dynamic import() target
//   proxyLocation                   location view that reports the real URL
//                                   and proxifies navigations
//
// The script mirrors `url::proxify` / `url::absolutify`, including the
// pseudo-scheme exclusions, so a URL the server already rewrote is never
// encoded twice.  It installs itself at most once per global.

/// The patch source, identical for every response.
pub const CLIENT_RUNTIME: &str = include_str!("runtime.js");

/// Statement recording the real document URL for the patch.
///
/// Pages always set it.  Scripts only set it when nothing did before them,
/// so a page's own base wins over the URLs of the scripts it loads; in a
/// worker the script URL is the right base.
pub fn base_declaration(base_url: &str, overwrite: bool) -> String {
    let quoted = serde_json::to_string(base_url)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/");
    if overwrite {
        format!("globalThis.__passageBase = {};", quoted)
    } else {
        format!(
            "if (!globalThis.__passageBase) globalThis.__passageBase = {};",
            quoted
        )
    }
}

/// The patch wrapped for insertion into markup.
pub fn script_tag(base_url: &str) -> String {
    format!(
        "<script>{}\n{}</script>",
        base_declaration(base_url, true),
        CLIENT_RUNTIME
    )
}

/// Splice the patch in front of the first `</head>`.
///
/// Returns the markup unchanged when there is no closing head tag.
pub fn inject_before_head_close(html: &str, base_url: &str) -> String {
    match find_ascii_case_insensitive(html, "</head>") {
        Some(idx) => {
            let tag = script_tag(base_url);
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..idx]);
            out.push_str(&tag);
            out.push_str(&html[idx..]);
            out
        }
        None => html.to_string(),
    }
}

/// Put the patch ahead of a script's own top-level code.
pub fn prepend_to_script(js: &str, base_url: &str) -> String {
    let declaration = base_declaration(base_url, false);
    let mut out =
        String::with_capacity(declaration.len() + CLIENT_RUNTIME.len() + js.len() + 2);
    out.push_str(&declaration);
    out.push('\n');
    out.push_str(CLIENT_RUNTIME);
    out.push('\n');
    out.push_str(js);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
