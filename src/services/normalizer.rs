//! Email body normalization.
//!
//! Converts an HTML body into compact Markdown-flavoured text for the
//! classifier, falling back to the plain-text part when conversion fails or
//! yields nothing, and caps the result at a fixed number of characters.

use thiserror::Error;

/// HTML conversion failure. Always resolved by falling back to plain text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),

    #[error("unterminated comment at byte {0}")]
    UnterminatedComment(usize),
}

/// Normalized body ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// Set when HTML was present but the plain-text part had to be used.
    pub used_fallback: bool,
}

/// Produces the bounded text sent to the classifier.
///
/// HTML is preferred when present and non-blank. A plain-text-only message is
/// not a fallback.
pub fn normalize(raw_html: Option<&str>, raw_text: Option<&str>, max_chars: usize) -> Normalized {
    let plain = || raw_text.unwrap_or_default().trim().to_string();

    let (text, used_fallback) = match raw_html.filter(|h| !h.trim().is_empty()) {
        Some(html) => match html_to_markdown(html) {
            Ok(converted) if !converted.trim().is_empty() => (converted, false),
            Ok(_) => {
                tracing::warn!("HTML body converted to empty text, using plain-text part");
                (plain(), true)
            }
            Err(error) => {
                tracing::warn!(%error, "HTML conversion failed, using plain-text part");
                (plain(), true)
            }
        },
        None => (plain(), false),
    };

    Normalized {
        text: truncate_chars(&text, max_chars),
        used_fallback,
    }
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Converts HTML to Markdown-flavoured text.
///
/// Handles paragraphs, line breaks, headings, list items, links, and
/// bold/italic runs; drops `script` and `style` content and every other tag.
pub fn html_to_markdown(html: &str) -> Result<String, ContentError> {
    let mut out = String::with_capacity(html.len() / 2);
    let mut skip_until: Option<String> = None;
    let mut links: Vec<Option<String>> = Vec::new();
    let mut pos = 0;

    while pos < html.len() {
        let rest = &html[pos..];

        // Raw-text elements: nothing inside is markup until the matching close tag.
        if let Some(name) = skip_until.take() {
            let end = find_close_tag(rest, &name).ok_or(ContentError::UnterminatedTag(pos))?;
            pos += end + 1;
            continue;
        }

        if rest.starts_with("<!--") {
            let end = rest[4..]
                .find("-->")
                .ok_or(ContentError::UnterminatedComment(pos))?;
            pos += 4 + end + 3;
            continue;
        }

        if rest.starts_with('<') && opens_tag(rest) {
            let end = find_tag_end(rest).ok_or(ContentError::UnterminatedTag(pos))?;
            let tag = Tag::parse(&rest[1..end]);
            pos += end + 1;
            render_tag(&tag, &mut out, &mut links, &mut skip_until);
            continue;
        }

        let first = rest.chars().next().map_or(1, char::len_utf8);
        let next = rest[first..]
            .find('<')
            .map_or(rest.len(), |i| i + first);
        push_text(&mut out, &decode_entities(&rest[..next]));
        pos += next;
    }

    Ok(tidy(&out))
}

struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    body: String,
}

impl Tag {
    fn parse(inner: &str) -> Self {
        let inner = inner.trim();
        let (closing, inner) = match inner.strip_prefix('/') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, inner),
        };
        let self_closing = inner.ends_with('/');
        let name = inner
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        Self {
            name,
            closing,
            self_closing,
            body: inner.to_string(),
        }
    }

    fn attr(&self, name: &str) -> Option<String> {
        let lower = self.body.to_ascii_lowercase();
        let mut search = 0;
        while let Some(found) = lower[search..].find(name) {
            let start = search + found;
            search = start + name.len();

            let boundary = lower[..start]
                .chars()
                .last()
                .is_some_and(char::is_whitespace);
            let after = lower[search..].trim_start();
            if !boundary || !after.starts_with('=') {
                continue;
            }

            let value_start = self.body.len() - after.len() + 1;
            let value = self.body[value_start..].trim_start();
            return Some(match value.chars().next() {
                Some(q @ ('"' | '\'')) => value[1..].split(q).next().unwrap_or_default().to_string(),
                _ => value
                    .split(|c: char| c.is_whitespace() || c == '>')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        None
    }
}

fn render_tag(
    tag: &Tag,
    out: &mut String,
    links: &mut Vec<Option<String>>,
    skip_until: &mut Option<String>,
) {
    match tag.name.as_str() {
        "script" | "style" | "head" | "title" if !tag.closing && !tag.self_closing => {
            *skip_until = Some(tag.name.clone());
        }
        "br" => out.push('\n'),
        "hr" => out.push_str("\n\n---\n\n"),
        "p" | "div" | "table" | "tr" | "section" | "article" | "header" | "footer"
        | "blockquote" | "ul" | "ol" => out.push_str("\n\n"),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            out.push_str("\n\n");
            if !tag.closing {
                let level = tag.name[1..].parse::<usize>().unwrap_or(1);
                out.push_str(&"#".repeat(level));
                out.push(' ');
            }
        }
        "li" if !tag.closing => out.push_str("\n- "),
        "td" | "th" if tag.closing => out.push(' '),
        "b" | "strong" => out.push_str("**"),
        "i" | "em" => out.push('_'),
        "a" if !tag.closing => {
            let href = tag.attr("href").filter(|h| !h.is_empty() && !h.starts_with('#'));
            if href.is_some() {
                out.push('[');
            }
            links.push(href);
        }
        "a" => {
            if let Some(Some(href)) = links.pop() {
                out.push_str("](");
                out.push_str(&href);
                out.push(')');
            }
        }
        _ => {}
    }
}

/// Whether `<` starts markup rather than a literal less-than sign.
fn opens_tag(rest: &str) -> bool {
    rest[1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

/// Byte offset of the `>` ending the first `</name` close tag in `rest`,
/// matched case-insensitively.
fn find_close_tag(rest: &str, name: &str) -> Option<usize> {
    let lower = rest.to_ascii_lowercase();
    let needle = format!("</{}", name);
    let mut search = 0;
    while let Some(found) = lower[search..].find(&needle) {
        let after = search + found + needle.len();
        let boundary = lower[after..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if boundary {
            return lower[after..].find('>').map(|gt| after + gt);
        }
        search = after;
    }
    None
}

/// Byte offset of the `>` closing the tag at the start of `rest`, honouring
/// quoted attribute values.
fn find_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

/// Appends text with HTML whitespace collapsing.
fn push_text(out: &mut String, text: &str) {
    for c in text.chars() {
        if c.is_whitespace() {
            if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..1 + semi]).map(|c| (c, semi + 2)));

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "mdash" => Some('\u{2014}'),
        "ndash" => Some('\u{2013}'),
        "hellip" => Some('\u{2026}'),
        "copy" => Some('\u{a9}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Trims every line and collapses runs of blank lines to one.
fn tidy(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut pending_blank = false;

    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            pending_blank = !lines.is_empty();
            continue;
        }
        if pending_blank {
            lines.push("");
            pending_blank = false;
        }
        lines.push(line);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn paragraphs_and_emphasis() {
        let md = html_to_markdown("<p>Hello <b>world</b></p><p>Second &amp; third</p>").unwrap();
        assert_eq!(md, "Hello **world**\n\nSecond & third");
    }

    #[test]
    fn headings_lists_and_links() {
        let html = r#"<h2>Agenda</h2><ul><li>One</li><li>Two <a href="https://x.test/a?b=1">link</a></li></ul>"#;
        let md = html_to_markdown(html).unwrap();
        assert_eq!(md, "## Agenda\n\n- One\n- Two [link](https://x.test/a?b=1)");
    }

    #[test]
    fn script_style_and_comments_are_dropped() {
        let html = "<html><head><title>T</title><style>p{color:red}</style></head>\
                    <body><!-- hidden --><script>alert('x')</script><p>Visible</p></body></html>";
        assert_eq!(html_to_markdown(html).unwrap(), "Visible");
    }

    #[test]
    fn line_breaks_and_whitespace() {
        let html = "<div>Line one<br>Line   two\n\n  continues</div>";
        assert_eq!(
            html_to_markdown(html).unwrap(),
            "Line one\nLine two continues"
        );
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            html_to_markdown("<p>a&nbsp;&lt;b&gt; &#65;&#x42; &unknown; &</p>").unwrap(),
            "a <b> AB &unknown; &"
        );
    }

    #[test]
    fn non_ascii_text() {
        assert_eq!(html_to_markdown("<p>日本語 ünïcode</p>").unwrap(), "日本語 ünïcode");
    }

    #[test]
    fn literal_less_than_is_text() {
        assert_eq!(html_to_markdown("<p>1 < 2</p>").unwrap(), "1 < 2");
    }

    #[test]
    fn quoted_gt_in_attribute() {
        let md = html_to_markdown(r#"<a href="https://x.test" title="a>b">go</a>"#).unwrap();
        assert_eq!(md, "[go](https://x.test)");
    }

    #[test]
    fn less_than_inside_script_does_not_swallow_the_body() {
        let out = normalize(
            Some("<p>Hello</p><script>if (a<b) { x(); }</script><p>Please approve the invoice</p>"),
            Some("plain"),
            1000,
        );
        assert_eq!(out.text, "Hello\n\nPlease approve the invoice");
        assert!(!out.used_fallback);
    }

    #[test]
    fn raw_text_close_tag_is_case_insensitive() {
        let md = html_to_markdown("<STYLE>a<b{}</Style ><p>kept</p><script>x</scripts></script>").unwrap();
        assert_eq!(md, "kept");
    }

    #[test]
    fn unclosed_script_falls_back() {
        let out = normalize(Some("<p>Hi</p><script>var a = 1;"), Some("Plain"), 100);
        assert_eq!(out.text, "Plain");
        assert!(out.used_fallback);
    }

    #[test]
    fn unterminated_markup_is_error() {
        assert_eq!(
            html_to_markdown("<p>Hello <b"),
            Err(ContentError::UnterminatedTag(9))
        );
        assert!(matches!(
            html_to_markdown("<p>x</p><!-- open"),
            Err(ContentError::UnterminatedComment(_))
        ));
    }

    #[test]
    fn valid_html_no_fallback() {
        let out = normalize(Some("<p>Quarterly <em>numbers</em></p>"), Some("plain"), 100);
        assert_eq!(out.text, "Quarterly _numbers_");
        assert!(!out.used_fallback);
    }

    #[test]
    fn broken_html_falls_back_to_plain_text() {
        let out = normalize(Some("<div>Broken <span"), Some("  Plain body \n"), 100);
        assert_eq!(out.text, "Plain body");
        assert!(out.used_fallback);
    }

    #[test]
    fn empty_conversion_falls_back() {
        let out = normalize(Some("<style>x{}</style>"), Some("Plain"), 100);
        assert_eq!(out.text, "Plain");
        assert!(out.used_fallback);
    }

    #[test]
    fn plain_only_is_not_fallback() {
        let out = normalize(None, Some("Just text"), 100);
        assert_eq!(out.text, "Just text");
        assert!(!out.used_fallback);

        let out = normalize(Some("   "), Some("Just text"), 100);
        assert!(!out.used_fallback);
    }

    #[test]
    fn output_is_truncated_on_every_path() {
        let out = normalize(Some("<p>abcdefghij</p>"), None, 4);
        assert_eq!(out.text, "abcd");

        let out = normalize(Some("<p"), Some("0123456789"), 3);
        assert_eq!(out.text, "012");
        assert!(out.used_fallback);

        let out = normalize(None, Some("héllo wörld"), 5);
        assert_eq!(out.text, "héllo");
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
