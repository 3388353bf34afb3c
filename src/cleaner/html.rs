//! Markup-to-text conversion.
//!
//! Block elements become paragraph breaks, `<br>` becomes a line break and
//! everything else inside a block collapses to single spaces. Content of
//! `<blockquote>` comes out as `>`-prefixed lines so the quote step drops it.

use std::sync::LazyLock;

use regex::Regex;

/// Elements whose text never reaches the reader.
static INVISIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<head\b.*?</head\s*>|<title\b.*?</title\s*>",
    )
    .unwrap()
});

/// Any tag, capturing the closing slash and the element name.
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)[^>]*>|<[!?][^>]*>").unwrap());

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "table", "tr", "pre",
    "section", "article", "header", "footer", "hr", "address", "dl", "dt", "dd", "body", "html",
    "center", "form", "fieldset", "figure", "main", "nav", "aside",
];

/// Convert an HTML body to plain text.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let html = INVISIBLE.replace_all(html, " ");
    let mut out = TextBuilder::default();
    let mut last = 0;

    for caps in TAG.captures_iter(&html) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_text(&html[last..whole.start()]);
        last = whole.end();

        let Some(name) = caps.get(2) else { continue };
        let name = name.as_str().to_ascii_lowercase();
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());

        match name.as_str() {
            "br" => out.line_break(),
            "blockquote" => {
                out.paragraph_break();
                if closing {
                    out.quote_depth = out.quote_depth.saturating_sub(1);
                } else {
                    out.quote_depth += 1;
                }
            }
            "td" | "th" => out.push_text(" "),
            n if BLOCK_ELEMENTS.contains(&n) => out.paragraph_break(),
            _ => {}
        }
    }
    out.push_text(&html[last..]);
    out.finish()
}

/// Decode the named entities mail clients actually emit, plus numeric ones.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "nbsp" => ' ',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "rsquo" => '’',
        "lsquo" => '‘',
        "rdquo" => '”',
        "ldquo" => '“',
        "copy" => '©',
        "reg" => '®',
        "euro" => '€',
        _ => return None,
    })
}

/// Accumulates text lines while tags are walked.
#[derive(Default)]
struct TextBuilder {
    lines: Vec<String>,
    current: String,
    quote_depth: usize,
}

impl TextBuilder {
    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let decoded = decode_entities(raw);
        let starts_ws = decoded.starts_with(char::is_whitespace);
        let ends_ws = decoded.ends_with(char::is_whitespace);
        let words: Vec<&str> = decoded.split_whitespace().collect();

        if words.is_empty() {
            if !self.current.is_empty() && !self.current.ends_with(' ') {
                self.current.push(' ');
            }
            return;
        }
        if starts_ws && !self.current.is_empty() && !self.current.ends_with(' ') {
            self.current.push(' ');
        }
        self.current.push_str(&words.join(" "));
        if ends_ws {
            self.current.push(' ');
        }
    }

    fn line_break(&mut self) {
        let line = self.current.trim().to_string();
        self.current.clear();
        if self.quote_depth > 0 {
            self.lines.push(format!("> {line}"));
        } else {
            self.lines.push(line);
        }
    }

    fn paragraph_break(&mut self) {
        if !self.current.trim().is_empty() {
            self.line_break();
        } else {
            self.current.clear();
        }
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn finish(mut self) -> String {
        if !self.current.trim().is_empty() {
            self.line_break();
        }
        let mut result: Vec<String> = Vec::with_capacity(self.lines.len());
        for line in self.lines {
            let blank = line.is_empty();
            if blank && result.last().is_none_or(|l: &String| l.is_empty()) {
                continue;
            }
            result.push(line);
        }
        while result.last().is_some_and(|l| l.is_empty()) {
            result.pop();
        }
        result.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_blank_line_separated() {
        assert_eq!(
            html_to_text("<p>Hi</p><p>Please send the report by 2025-12-12.</p>"),
            "Hi\n\nPlease send the report by 2025-12-12."
        );
    }

    #[test]
    fn nested_inline_tags_collapse() {
        assert_eq!(
            html_to_text("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn attributes_are_dropped() {
        assert_eq!(
            html_to_text(r#"<a href="https://example.com" class="x">Link</a>"#),
            "Link"
        );
    }

    #[test]
    fn whitespace_inside_block_collapses() {
        assert_eq!(
            html_to_text("<p>  Hello \n\t  World  </p>"),
            "Hello World"
        );
    }

    #[test]
    fn br_is_a_line_break() {
        assert_eq!(
            html_to_text("Line one<br>Line two<br/>Line three"),
            "Line one\nLine two\nLine three"
        );
    }

    #[test]
    fn script_style_and_comments_removed() {
        let html = "<html><head><title>T</title><style>p{color:red}</style></head>\
                    <body><!-- hidden --><script>alert(1)</script><p>Visible</p></body></html>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn blockquote_lines_are_quote_prefixed() {
        let html = "<p>My answer</p><blockquote>Old text<br>More old</blockquote>";
        let text = html_to_text(html);
        assert!(text.starts_with("My answer"));
        assert!(text.contains("> Old text"));
        assert!(text.contains("> More old"));
    }

    #[test]
    fn entities_decoded() {
        assert_eq!(
            html_to_text("<p>Fish &amp; chips&nbsp;&#8212; &#x41;</p>"),
            "Fish & chips — A"
        );
    }

    #[test]
    fn unknown_entity_left_alone() {
        assert_eq!(decode_entities("&bogus; &amp;"), "&bogus; &");
    }

    #[test]
    fn empty_and_plain_input() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("No HTML here"), "No HTML here");
    }

    #[test]
    fn table_cells_separated_by_spaces() {
        assert_eq!(
            html_to_text("<table><tr><td>Name</td><td>Value</td></tr></table>"),
            "Name Value"
        );
    }
}
