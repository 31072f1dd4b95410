//! Content classification for stored overflow artifacts
//!
//! Minified or serialized payloads (DOM dumps, one-line JSON) arrive as a few
//! enormous lines. Those are written as text, or as re-indented HTML when the
//! payload is escaped markup. Everything else is pretty-printed JSON.

use super::ArtifactKind;
use crate::history::Part;
use serde_json::Value;

/// At most this many lines for the total-size rule to apply
pub const MASSIVE_MAX_LINES: usize = 5;

/// Total size that makes a few-line payload massive
pub const MASSIVE_MIN_BYTES: usize = 50_000;

/// Any single line this long marks the payload massive
pub const LONG_LINE_BYTES: usize = 10_000;

/// Average bytes per line that marks the payload massive
pub const DENSE_BYTES_PER_LINE: usize = 5_000;

const HTML_MARKERS: &[&str] = &[
    "<html", "<!doctype", "<div", "<body", "<head", "<span", "<script", "<table", "<p>", "<a ",
];

/// Content prepared for writing
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedContent {
    pub kind: ArtifactKind,
    pub content: String,
}

/// Few lines carrying a very large payload.
pub fn is_single_line_massive(text: &str) -> bool {
    let lines = text.lines().count().max(1);
    let longest = text.lines().map(str::len).max().unwrap_or(0);
    (lines <= MASSIVE_MAX_LINES && text.len() > MASSIVE_MIN_BYTES)
        || longest > LONG_LINE_BYTES
        || text.len() / lines > DENSE_BYTES_PER_LINE
}

/// Markup hidden behind JSON string escapes or HTML entities.
pub fn is_escaped_html(text: &str) -> bool {
    let has_escapes = text.contains("\\u003c")
        || text.contains("&lt;")
        || text.contains("\\\"")
        || text.contains("\\n");
    if !has_escapes {
        return false;
    }
    let unescaped = unescape_html(&text[..floor_char_boundary(text, 20_000)]).to_ascii_lowercase();
    HTML_MARKERS.iter().any(|marker| unescaped.contains(marker))
}

/// Undo JSON string escapes and common HTML entities.
pub fn unescape_html(text: &str) -> String {
    text.replace("\\u003c", "<")
        .replace("\\u003C", "<")
        .replace("\\u003e", ">")
        .replace("\\u003E", ">")
        .replace("\\u0026", "&")
        .replace("\\\"", "\"")
        .replace("\\/", "/")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

fn tag_name(line: &str) -> &str {
    line.trim_start_matches('<')
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .next()
        .unwrap_or("")
}

/// Put each tag on its own line, indented by nesting depth.
pub fn indent_html(html: &str) -> String {
    let split = html.replace("><", ">\n<");
    let mut out = String::with_capacity(split.len() + split.len() / 4);
    let mut depth: usize = 0;

    for raw in split.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let closing = line.starts_with("</");
        if closing {
            depth = depth.saturating_sub(1);
        }

        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(line);
        out.push('\n');

        let name = tag_name(line).to_ascii_lowercase();
        let opens = line.starts_with('<')
            && !closing
            && !line.starts_with("<!")
            && !line.ends_with("/>")
            && !VOID_ELEMENTS.contains(&name.as_str())
            && !line.contains(&format!("</{}", name));
        if opens {
            depth += 1;
        }
    }
    out
}

/// Concatenated text of the parts; non-text parts contribute their JSON.
pub fn plain_text(parts: &[Part]) -> String {
    parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Choose the artifact format and render its content.
pub fn classify(parts: &[Part]) -> ClassifiedContent {
    let text = plain_text(parts);

    if is_single_line_massive(&text) {
        if is_escaped_html(&text) {
            return ClassifiedContent {
                kind: ArtifactKind::Html,
                content: indent_html(&unescape_html(&text)),
            };
        }
        return ClassifiedContent {
            kind: ArtifactKind::PlainText,
            content: text,
        };
    }

    let pretty = match serde_json::from_str::<Value>(&text) {
        Ok(value) => serde_json::to_string_pretty(&value),
        Err(_) => serde_json::to_string_pretty(parts),
    };
    match pretty {
        Ok(content) => ClassifiedContent {
            kind: ArtifactKind::Json,
            content,
        },
        Err(_) => ClassifiedContent {
            kind: ArtifactKind::PlainText,
            content: text,
        },
    }
}

/// Largest index `<= max` on a char boundary of `text`.
pub(crate) fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    let mut index = max;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
