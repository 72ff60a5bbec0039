// passage_proxy::js
//
// JavaScript rewriter using SWC.  Parses the source into an AST, walks it
// with a read-only visitor that records text edits at the call sites below,
// then splices those edits into the original source.  The AST is never
// re-emitted, so formatting, comments and untouched code stay exactly as
// the origin served them.
//
// Rewrites:
//   ● Navigation: window.location, location.<prop>  → proxyLocation
//   ● Modules: import("…") → proxyImport("…"), import/export … from "…"
//   ● Network: fetch, importScripts, proxyImport, navigator.sendBeacon
//   ● Constructors: new Request / URL / EventSource / Worker / SharedWorker
//   ● Any string literal equal to the page URL itself
//
// Only string-literal URLs are rewritten here.  URLs computed at runtime are
// caught by the client runtime patch (see runtime.rs).

use log::debug;
use swc_common::{sync::Lrc, BytePos, FileName, Globals, SourceFile, SourceMap, Span, GLOBALS};
use swc_ecma_ast::*;
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_visit::{Visit, VisitWith};

use crate::edit::EditList;
use crate::error::RewriteError;
use crate::url::rewrite_url;

/// Global the runtime patch installs in place of `location`.
pub const PROXY_LOCATION: &str = "proxyLocation";

/// Global the runtime patch installs in place of dynamic `import()`.
pub const PROXY_IMPORT: &str = "proxyImport";

/// Bare callees whose string arguments are all URLs.
const CALL_SINKS: &[&str] = &["fetch", "importScripts", PROXY_IMPORT];

/// Constructor names whose first argument is a URL.
const CONSTRUCTOR_SINKS: &[&str] = &["Request", "URL", "EventSource", "Worker", "SharedWorker"];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse and rewrite a JavaScript source string.
///
/// * `source`   – the raw JS code
/// * `base_url` – URL the script was served from (or the embedding page)
/// * `host`     – upstream host, for diagnostics
///
/// The module grammar is tried first; classic scripts that are not valid
/// modules (sloppy-mode `with`, octal literals, …) fall back to the script
/// grammar.  Input neither grammar accepts is a [`RewriteError::Parse`];
/// callers are expected to serve the original text in that case.
pub fn rewrite_js(source: &str, base_url: &str, host: &str) -> Result<String, RewriteError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("input.js".into())),
        source.into(),
    );

    GLOBALS.set(&Globals::new(), || {
        let program = parse_program(&fm)?;

        let mut sites = UrlSites {
            source,
            base: base_url,
            origin: fm.start_pos,
            edits: EditList::new(),
        };
        program.visit_with(&mut sites);

        if sites.edits.is_empty() {
            return Ok(source.to_string());
        }
        debug!("js from {}: {} site(s) rewritten", host, sites.edits.len());
        Ok(sites.edits.apply(source))
    })
}

fn parse_program(fm: &SourceFile) -> Result<Program, RewriteError> {
    let module_err = match parser_for(fm).parse_module() {
        Ok(module) => return Ok(Program::Module(module)),
        Err(err) => err,
    };
    parser_for(fm)
        .parse_script()
        .map(Program::Script)
        .map_err(|_| RewriteError::Parse {
            kind: "javascript",
            reason: format!("{:?}", module_err.kind()),
        })
}

fn parser_for(fm: &SourceFile) -> Parser<Lexer<'_>> {
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax {
            jsx: false,
            import_attributes: true,
            ..Default::default()
        }),
        EsVersion::Es2022,
        StringInput::from(fm),
        None,
    );
    Parser::new_from(lexer)
}

// ---------------------------------------------------------------------------
// AST Visitor
// ---------------------------------------------------------------------------

struct UrlSites<'a> {
    source: &'a str,
    base: &'a str,
    origin: BytePos,
    edits: EditList,
}

impl UrlSites<'_> {
    /// Byte range of `span` within the original source.
    fn range(&self, span: Span) -> (usize, usize) {
        let start = span.lo().0.saturating_sub(self.origin.0) as usize;
        let end = span.hi().0.saturating_sub(self.origin.0) as usize;
        (start, end)
    }

    fn rename(&mut self, span: Span, to: &str) {
        let (start, end) = self.range(span);
        self.edits.replace(start, end, to);
    }

    /// Replace the contents of a string literal, keeping its quotes.
    fn rewrite_str(&mut self, lit: &Str) {
        let value: &str = &lit.value;
        let rewritten = rewrite_url(value, self.base);
        if rewritten == value {
            return;
        }
        let (start, end) = self.range(lit.span);
        if end < start + 2 {
            return;
        }
        let Some(quote) = self.source.get(start..start + 1) else {
            return;
        };
        let escaped = escape_js_string(&rewritten, quote);
        self.edits.replace(start + 1, end - 1, escaped);
    }

    fn rewrite_arg(&mut self, arg: Option<&ExprOrSpread>) {
        if let Some(lit) = arg.and_then(str_arg) {
            self.rewrite_str(lit);
        }
    }
}

/// Make `value` safe to splice between a pair of `quote` characters.
fn escape_js_string(value: &str, quote: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if quote.starts_with(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn str_arg(arg: &ExprOrSpread) -> Option<&Str> {
    if arg.spread.is_some() {
        return None;
    }
    match &*arg.expr {
        Expr::Lit(Lit::Str(lit)) => Some(lit),
        _ => None,
    }
}

fn is_ident(expr: &Expr, name: &str) -> bool {
    matches!(expr, Expr::Ident(id) if &*id.sym == name)
}

impl Visit for UrlSites<'_> {
    // ---- window.location / location.x ----
    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if is_ident(&n.obj, "window") {
            if let MemberProp::Ident(prop) = &n.prop {
                if &*prop.sym == "location" {
                    self.rename(prop.span, PROXY_LOCATION);
                }
            }
        }
        if let Expr::Ident(obj) = &*n.obj {
            if &*obj.sym == "location" && !matches!(n.prop, MemberProp::Computed(_)) {
                self.rename(obj.span, PROXY_LOCATION);
            }
        }
        n.visit_children_with(self);
    }

    // ---- import(), fetch(), importScripts(), sendBeacon() ----
    fn visit_call_expr(&mut self, n: &CallExpr) {
        match &n.callee {
            Callee::Import(import) => {
                let (start, _) = self.range(import.span);
                if self.source.get(start..start + 6) == Some("import") {
                    self.edits.replace(start, start + 6, PROXY_IMPORT);
                }
                self.rewrite_arg(n.args.first());
            }
            Callee::Expr(callee) => match &**callee {
                Expr::Ident(id) if CALL_SINKS.contains(&&*id.sym) => {
                    for arg in &n.args {
                        self.rewrite_arg(Some(arg));
                    }
                }
                Expr::Member(member) if is_ident(&member.obj, "navigator") => {
                    if matches!(&member.prop, MemberProp::Ident(p) if &*p.sym == "sendBeacon") {
                        self.rewrite_arg(n.args.first());
                    }
                }
                _ => {}
            },
            Callee::Super(_) => {}
        }
        n.visit_children_with(self);
    }

    // ---- new Worker("…"), new URL("…") ----
    fn visit_new_expr(&mut self, n: &NewExpr) {
        if let Expr::Ident(id) = &*n.callee {
            if CONSTRUCTOR_SINKS.contains(&&*id.sym) {
                self.rewrite_arg(n.args.as_ref().and_then(|args| args.first()));
            }
        }
        n.visit_children_with(self);
    }

    // ---- import … from "…" / export … from "…" ----
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        self.rewrite_str(&n.src);
        n.visit_children_with(self);
    }

    fn visit_named_export(&mut self, n: &NamedExport) {
        if let Some(src) = &n.src {
            self.rewrite_str(src);
        }
        n.visit_children_with(self);
    }

    fn visit_export_all(&mut self, n: &ExportAll) {
        self.rewrite_str(&n.src);
        n.visit_children_with(self);
    }

    // ---- self-referencing page URL ----
    fn visit_str(&mut self, n: &Str) {
        if &*n.value == self.base {
            self.rewrite_str(n);
        }
    }
}
