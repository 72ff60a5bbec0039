// passage_proxy::css
//
// CSS rewriter.  Tokenizes CSS with `cssparser` (lexical only, so malformed
// stylesheets still come through) and rewrites every URL reference so it
// routes through the proxy:
//
//   @import "…"  /  @import '…'  /  @import bare.css
//   url(…)  /  url("…")  /  url('…')   anywhere, including inside
//                                      @import, @font-face, image-set()
//
// Rewriting is positional: token source ranges are turned into edits and
// spliced into the original text, so whitespace, comments, quoting and
// everything else outside a URL survive byte for byte.

use cssparser::{ParseError, Parser, ParserInput, SourcePosition, Token};
use log::debug;

use crate::edit::EditList;
use crate::url::rewrite_url;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Rewrite a stylesheet, `<style>` body or inline `style` attribute.
///
/// Runs two passes.  The first handles string and bare `@import` targets;
/// `@import url(…)` is deliberately left for the second pass, which handles
/// every `url(…)`.  Splitting them keeps any one URL from being encoded
/// twice.
pub fn rewrite_css(css: &str, base_url: &str) -> String {
    let imported = run_pass(css, Pass::Imports, base_url);
    run_pass(&imported, Pass::Urls, base_url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Imports,
    Urls,
}

fn run_pass(css: &str, pass: Pass, base: &str) -> String {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut edits = EditList::new();

    collect(&mut parser, css, pass, base, &mut edits);

    if edits.is_empty() {
        return css.to_string();
    }
    debug!("css {:?} pass: {} url(s) rewritten", pass, edits.len());
    edits.apply(css)
}

// ---------------------------------------------------------------------------
// Token walker
// ---------------------------------------------------------------------------

fn collect(
    parser: &mut Parser<'_, '_>,
    source: &str,
    pass: Pass,
    base: &str,
    edits: &mut EditList,
) {
    // Set after an @import keyword until its target (or `;`) is seen.
    let mut in_import = false;

    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(t) => t.clone(),
            Err(_) => break,
        };

        match token {
            Token::WhiteSpace(_) | Token::Comment(_) => {}

            Token::AtKeyword(ref kw) if kw.eq_ignore_ascii_case("import") => {
                in_import = true;
            }

            Token::Semicolon => in_import = false,

            Token::QuotedString(ref value) if in_import => {
                in_import = false;
                if pass == Pass::Imports {
                    let raw = parser.slice_from(start);
                    push_quoted(edits, start, raw, value, base);
                }
            }

            Token::UnquotedUrl(ref value) => {
                in_import = false;
                if pass == Pass::Urls {
                    let raw = parser.slice_from(start);
                    if let Some((from, to)) = unquoted_url_span(raw) {
                        let proxied = rewrite_url(value, base);
                        if proxied.as_str() != &**value {
                            let offset = start.byte_index();
                            edits.replace(offset + from, offset + to, escape_unquoted(&proxied));
                        }
                    }
                }
            }

            Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
                in_import = false;
                let _: Result<(), ParseError<'_, ()>> = parser.parse_nested_block(|inner| {
                    if pass == Pass::Urls {
                        collect_url_argument(inner, base, edits);
                    }
                    Ok(())
                });
            }

            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                in_import = false;
                let _: Result<(), ParseError<'_, ()>> = parser.parse_nested_block(|inner| {
                    collect(inner, source, pass, base, edits);
                    Ok(())
                });
            }

            // Bare target: `@import theme.css;`.  The tokenizer splits it
            // into several tokens, so take the raw run up to whitespace or `;`.
            _ if in_import => {
                in_import = false;
                if pass == Pass::Imports {
                    let from = start.byte_index();
                    let rest = &source[from..];
                    let len = rest
                        .find(|c: char| c == ';' || c.is_whitespace())
                        .unwrap_or(rest.len());
                    let target = &rest[..len];
                    let proxied = rewrite_url(target, base);
                    if len > 0 && proxied != target {
                        edits.replace(from, from + len, escape_unquoted(&proxied));
                    }
                }
            }

            _ => {}
        }
    }
}

/// Inside `url(` … `)`: rewrite the first quoted string.
fn collect_url_argument(parser: &mut Parser<'_, '_>, base: &str, edits: &mut EditList) {
    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(t) => t.clone(),
            Err(_) => break,
        };
        if let Token::QuotedString(ref value) = token {
            let raw = parser.slice_from(start);
            push_quoted(edits, start, raw, value, base);
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replace the text between the quotes of a string token.
fn push_quoted(edits: &mut EditList, start: SourcePosition, raw: &str, value: &str, base: &str) {
    let Some(quote) = raw.chars().next() else {
        return;
    };
    // An unterminated string at EOF has no closing quote.
    let inner_end = if raw.len() >= 2 && raw.ends_with(quote) {
        raw.len() - 1
    } else {
        raw.len()
    };
    let rewritten = rewrite_url(value, base);
    if rewritten == value {
        return;
    }
    let offset = start.byte_index();
    edits.replace(offset + 1, offset + inner_end, escape_css_string(&rewritten, quote));
}

/// Escape `value` for a CSS string delimited by `quote`.
fn escape_css_string(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\a "),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Percent-encode the characters an unquoted `url(…)` cannot hold.
fn escape_unquoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '\'' => out.push_str("%27"),
            '"' => out.push_str("%22"),
            '\\' => out.push_str("%5C"),
            c if c.is_ascii_whitespace() => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Byte range of the URL inside an unquoted `url( … )` token, relative to
/// the token start.  Surrounding whitespace stays outside the range.
fn unquoted_url_span(raw: &str) -> Option<(usize, usize)> {
    let open = raw.find('(')? + 1;
    let close = match raw.rfind(')') {
        Some(close) if close >= open => close,
        _ => raw.len(),
    };
    let inner = &raw[open..close];
    let lead = inner.len() - inner.trim_start().len();
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some((open + lead, open + lead + trimmed.len()))
}
