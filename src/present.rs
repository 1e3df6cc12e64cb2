//! Result presentation: keyword highlighting.
//!
//! [`present`] splits the result text into plain and emphasized
//! [`Segment`]s. The segments carry raw text; each renderer escapes that text
//! for its target first and only then adds its own emphasis markup, so text
//! coming back from the backend can never smuggle markup of its own.

use regex::RegexBuilder;

use crate::models::SearchMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub emphasized: bool,
}

/// Result text split into emphasized and plain runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Presented {
    segments: Vec<Segment>,
}

/// Highlight every case-insensitive occurrence of `query` in `text`.
///
/// Only applies in [`SearchMode::Keyword`] with a non-blank query; the query
/// is matched literally, metacharacters included. Semantic results pass
/// through unchanged.
pub fn present(text: &str, mode: SearchMode, query: &str) -> Presented {
    if mode != SearchMode::Keyword || query.trim().is_empty() {
        return Presented::plain(text);
    }

    let matcher = RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build();
    let Ok(matcher) = matcher else {
        // Only reachable for queries over the regex size limit
        tracing::debug!(len = query.len(), "query too large to highlight");
        return Presented::plain(text);
    };

    let mut presented = Presented::default();
    let mut last = 0;
    for m in matcher.find_iter(text) {
        presented.push(&text[last..m.start()], false);
        presented.push(m.as_str(), true);
        last = m.end();
    }
    presented.push(&text[last..], false);
    presented
}

impl Presented {
    pub fn plain(text: &str) -> Self {
        let mut presented = Self::default();
        presented.push(text, false);
        presented
    }

    fn push(&mut self, text: &str, emphasized: bool) {
        if !text.is_empty() {
            self.segments.push(Segment {
                text: text.to_string(),
                emphasized,
            });
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn match_count(&self) -> usize {
        self.segments.iter().filter(|s| s.emphasized).count()
    }

    /// The text with no markup at all.
    pub fn to_plain(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// HTML with matches wrapped in `<mark>`. All text is escaped first.
    pub fn to_html(&self) -> String {
        self.render(escape_html, "<mark>", "</mark>")
    }

    /// Terminal text with matches in bold yellow.
    ///
    /// Control characters (other than newline and tab) are dropped from the
    /// content so backend output cannot emit its own escape sequences.
    pub fn to_terminal(&self) -> String {
        self.render(strip_controls, "\x1b[1;33m", "\x1b[0m")
    }

    fn render(&self, escape: fn(&str) -> String, open: &str, close: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let text = escape(&segment.text);
            if segment.emphasized {
                out.push_str(open);
                out.push_str(&text);
                out.push_str(close);
            } else {
                out.push_str(&text);
            }
        }
        out
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn strip_controls(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
