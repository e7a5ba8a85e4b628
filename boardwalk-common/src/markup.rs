//! Turns submitted post text into HTML that can be rendered as-is.
//!
//! The text is escaped once up front. The two rewrites that follow only ever
//! insert markup around already-escaped content.

use once_cell::sync::Lazy;
use regex::Regex;

/// `::` at the start of a line highlights the rest of it.
static HIGHLIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mR)^[ \t]*(::.*?)[ \t]*$").expect("invalid highlight regex")
});

/// `>>123` at the start of a line links to post 123. Matched after escaping.
static BACK_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mR)^[ \t]*(&gt;&gt;([0-9]+))").expect("invalid back-reference regex")
});

const HIGHLIGHT_REPLACEMENT: &str = r#"<span class="highlight">$1</span>"#;
const BACK_REFERENCE_REPLACEMENT: &str =
    r##"<a class="quote-link" data-quoted="$2" href="#$2/">$1</a>"##;

#[must_use]
pub fn render_post_text(raw: &str) -> String {
    let escaped = escape_html(raw);
    let highlighted = HIGHLIGHT_RE.replace_all(&escaped, HIGHLIGHT_REPLACEMENT);
    BACK_REFERENCE_RE
        .replace_all(&highlighted, BACK_REFERENCE_REPLACEMENT)
        .into_owned()
}

#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}
