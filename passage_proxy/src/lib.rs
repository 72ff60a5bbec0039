// passage_proxy
//
// Server-side rewriting web proxy.  A browser asks for
// `/proxy?q=<target>`; the proxy validates the target against an SSRF
// guard, fetches it, and rewrites every URL-bearing construct in the
// response so that follow-up requests route back through `/proxy`.
//
// Layout:
//   safety    SSRF guard (scheme and host checks)
//   url       proxify / absolutify / passthrough rules
//   edit      position-keyed text edits shared by the css and js rewriters
//   html      DOM rewriter (attributes, srcset, inline style and script)
//   css       token-level stylesheet rewriter
//   js        AST-located script rewriter
//   csp       content policy header and <meta> detection
//   runtime   client-side patch injected into pages and scripts
//   fetch     upstream fetcher with manual, validated redirects
//   dispatch  content-type routing of fetched bodies
//   server    axum router and listener
//   config    environment configuration
//   error     error types

pub mod config;
pub mod csp;
pub mod css;
pub mod dispatch;
pub mod edit;
pub mod error;
pub mod fetch;
pub mod html;
pub mod js;
pub mod runtime;
pub mod safety;
pub mod server;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ProxyConfig;
pub use error::{FetchError, ProxyError, RewriteError, ServeError};
pub use fetch::{Fetcher, HttpTransport, Transport};
pub use server::{router, serve};
