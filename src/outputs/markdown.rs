//! Telegram MarkdownV2 preparation for generated posts.
//!
//! The model writes posts in a lightweight author markup where emphasis can
//! be written two ways: `__bold__` / `_italic_` or `**bold**` / `*italic*`.
//! Before a post is sent as rich text it goes through two steps:
//!
//! 1. [`format`]: normalise both conventions onto `**` / `*`, hide the
//!    balanced markers behind private-use placeholders, escape every reserved
//!    character, then restore the markers.
//! 2. [`truncate`]: shorten the escaped text to a length budget, preferring a
//!    space at which no bold or italic span is open.
//!
//! All lengths are counted in Unicode scalar values.
//!
//! ```text
//! raw ──normalise──▶ mask ──escape_reserved──▶ unmask ──truncate──▶ send
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::utils::char_len;

/// Canonical bold marker left unescaped in formatted output.
pub const BOLD_MARKER: &str = "**";
/// Canonical italic marker left unescaped in formatted output.
pub const ITALIC_MARKER: &str = "*";
/// Appended to text that was shortened.
pub const ELLIPSIS: char = '…';

const BOLD_MASK: char = '\u{E001}';
const ITALIC_MASK: char = '\u{E002}';

/// Characters that must be backslash-escaped in MarkdownV2 text.
///
/// `*` is in the set because only *balanced* markers are masked before the
/// escaping pass; a stray `*` is plain text.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

static DOUBLE_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__([^_\n]+?)__").expect("valid bold regex"));
static SINGLE_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([^_\n]+?)_").expect("valid italic regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Bold,
    Italic,
}

impl Span {
    fn width(self) -> usize {
        match self {
            Span::Bold => 2,
            Span::Italic => 1,
        }
    }

    fn mask(self) -> char {
        match self {
            Span::Bold => BOLD_MASK,
            Span::Italic => ITALIC_MASK,
        }
    }
}

/// Convert raw author markup into MarkdownV2-safe text.
///
/// Balanced bold/italic spans survive as `**` / `*`. Everything else that
/// MarkdownV2 reserves, including unmatched markers, comes out escaped.
/// The output is final: formatting it again would escape the escapes.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format("__Big__ news. Price: 5+5!"), r"**Big** news\. Price: 5\+5\!");
/// ```
pub fn format(raw: &str) -> String {
    // The placeholders must not occur in the input for unmasking to be exact.
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != BOLD_MASK && *c != ITALIC_MASK)
        .collect();
    let normalised = normalise_markers(&cleaned);
    let masked = mask_spans(&normalised);
    let escaped = escape_reserved(&masked);
    unmask_spans(&escaped)
}

/// Rewrite `__x__` to `**x**` and `_x_` to `*x*`.
fn normalise_markers(text: &str) -> String {
    let bold = DOUBLE_UNDERSCORE.replace_all(text, "**${1}**");
    SINGLE_UNDERSCORE.replace_all(&bold, "*${1}*").into_owned()
}

/// Replace every well-nested pair of `**` / `*` markers with placeholders.
///
/// Runs of asterisks are read greedily as `**` tokens with a trailing `*`.
/// A token closes the innermost open span of the same kind; a token whose
/// kind is open further down the stack would close spans asymmetrically and
/// stays literal, as does any token left open at the end.
fn mask_spans(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();

    let mut tokens: Vec<(Span, usize)> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' {
            let span = if chars.get(i + 1) == Some(&'*') {
                Span::Bold
            } else {
                Span::Italic
            };
            tokens.push((span, i));
            i += span.width();
        } else {
            i += 1;
        }
    }

    let mut paired = vec![false; tokens.len()];
    let mut open: Vec<usize> = Vec::new();
    for (t, &(span, _)) in tokens.iter().enumerate() {
        match open.last() {
            Some(&top) if tokens[top].0 == span => {
                paired[top] = true;
                paired[t] = true;
                open.pop();
            }
            _ if open.iter().any(|&o| tokens[o].0 == span) => {}
            _ => open.push(t),
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut next = tokens.iter().zip(paired.iter()).peekable();
    let mut i = 0;
    while i < chars.len() {
        match next.peek() {
            Some(&(&(span, at), &is_paired)) if at == i => {
                if is_paired {
                    out.push(span.mask());
                } else {
                    out.extend(std::iter::repeat_n('*', span.width()));
                }
                i += span.width();
                next.next();
            }
            _ => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

/// Backslash-escape every reserved character.
///
/// Backslashes are escaped as part of the same pass, so an escape inserted
/// here is never itself escaped again.
pub fn escape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c == '\\' || RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unmask_spans(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            BOLD_MASK => out.push_str(BOLD_MARKER),
            ITALIC_MASK => out.push_str(ITALIC_MARKER),
            _ => out.push(c),
        }
    }
    out
}

/// Shorten escaped MarkdownV2 text to roughly `limit` characters.
///
/// Text already within `limit` is returned unchanged. Otherwise the first
/// `limit` characters are scanned while tracking whether a bold or italic
/// span is open (escaped characters are skipped). The cut goes at the last
/// space seen with no span open; without one it falls back to `limit - 1`,
/// which can split a span. Trailing whitespace is dropped and [`ELLIPSIS`]
/// appended. The cut is always before `limit`, so the result fits in `limit`
/// characters (a lone ellipsis when `limit` is zero).
pub fn truncate(escaped: &str, limit: usize) -> String {
    let chars: Vec<char> = escaped.chars().collect();
    if chars.len() <= limit {
        return escaped.to_string();
    }

    let mut bold = false;
    let mut italic = false;
    let mut last_safe_space = None;
    let mut i = 0;
    while i < limit {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                bold = !bold;
                i += 2;
                continue;
            }
            '*' => italic = !italic,
            ' ' if !bold && !italic => last_safe_space = Some(i),
            _ => {}
        }
        i += 1;
    }

    let mut cut = last_safe_space.unwrap_or(limit.saturating_sub(1));
    let trailing_backslashes = chars[..cut].iter().rev().take_while(|c| **c == '\\').count();
    if trailing_backslashes % 2 == 1 {
        cut -= 1;
    }

    let mut out: String = chars[..cut].iter().collect();
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}

/// Format raw text and, when a budget is given, truncate it to fit.
pub fn prepare(raw: &str, limit: Option<usize>) -> String {
    let escaped = format(raw);
    match limit {
        Some(limit) if char_len(&escaped) > limit => truncate(&escaped, limit),
        _ => escaped,
    }
}

/// Shorten unformatted text to at most `limit` characters, ellipsis included.
///
/// Cuts at the last whitespace inside the budget when there is one.
pub fn truncate_plain(text: &str, limit: usize) -> String {
    if char_len(text) <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit.saturating_sub(1)).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &head[..pos],
        _ => head.as_str(),
    };
    let mut out = cut.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

/// The MarkdownV2 channel link appended after a rich-text body.
pub fn rich_link(label: &str, target: &Url) -> String {
    let target = target.as_str().replace('\\', "\\\\").replace(')', "\\)");
    format!("\n\n[{}]({})", escape_reserved(label), target)
}

/// The channel link appended after a plain-text body.
pub fn plain_link(label: &str, target: &Url) -> String {
    format!("\n\n{}: {}", label, target)
}
