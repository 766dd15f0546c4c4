//! HTML sanitiser for the transport's restricted subset
//!
//! The transport renders only a fixed whitelist of inline tags. Everything
//! else is stripped with its text kept. Entity escaping is idempotent
//! (already-escaped entities are recognised, not double-escaped) and
//! unclosed whitelisted tags are auto-balanced, so
//! `sanitise(sanitise(x)) == sanitise(x)` holds for every input.

const ALLOWED_TAGS: &[&str] = &["b", "strong", "i", "em", "u", "s", "code", "pre", "a"];

/// Known entities that must survive untouched for idempotency.
fn entity_length(text: &str) -> Option<usize> {
    let rest = text.strip_prefix('&')?;
    for named in ["amp;", "lt;", "gt;", "quot;", "#39;"] {
        if rest.starts_with(named) {
            return Some(1 + named.len());
        }
    }
    // Numeric entities: &#123; or &#x1F600;
    let digits = rest.strip_prefix('#')?;
    let (body, radix_len) = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 2),
        None => (digits, 1),
    };
    let len = body
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .count();
    if len == 0 {
        return None;
    }
    if body.chars().nth(len) == Some(';') {
        Some(1 + radix_len + len + 1)
    } else {
        None
    }
}

#[derive(Debug)]
struct ParsedTag {
    name: String,
    closing: bool,
    href: Option<String>,
    /// Bytes consumed including the angle brackets
    consumed: usize,
}

/// Parse a tag at `text` (which starts with '<'). Returns None when the
/// run of characters is not a plausible tag and should be escaped as text.
fn parse_tag(text: &str) -> Option<ParsedTag> {
    let end = text.find('>')?;
    let inner = &text[1..end];

    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };

    // Real tags start with a name right after '<' or '</'; anything
    // spaced out ("a < b > c") is prose and gets escaped instead.
    if !inner.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let name_len = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    if name_len == 0 {
        return None;
    }
    let name = inner[..name_len].to_lowercase();
    let attrs = &inner[name_len..];

    let href = if !closing && name == "a" {
        extract_href(attrs)
    } else {
        None
    };

    Some(ParsedTag {
        name,
        closing,
        href,
        consumed: end + 1,
    })
}

fn extract_href(attrs: &str) -> Option<String> {
    let idx = attrs.to_lowercase().find("href")?;
    let rest = attrs[idx + 4..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let body = &rest[1..];
    let close = body.find(quote)?;
    Some(body[..close].to_string())
}

/// Sanitise arbitrary model output into the transport subset.
pub fn sanitise(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut open_stack: Vec<String> = Vec::new();
    let mut rest = input;

    while let Some(idx) = rest.find(['<', '>', '&']) {
        let (plain, tail) = rest.split_at(idx);
        output.push_str(plain);

        match tail.as_bytes()[0] {
            b'&' => {
                if let Some(len) = entity_length(tail) {
                    output.push_str(&tail[..len]);
                    rest = &tail[len..];
                } else {
                    output.push_str("&amp;");
                    rest = &tail[1..];
                }
            }
            b'>' => {
                output.push_str("&gt;");
                rest = &tail[1..];
            }
            _ => match parse_tag(tail) {
                None => {
                    output.push_str("&lt;");
                    rest = &tail[1..];
                }
                Some(tag) => {
                    rest = &tail[tag.consumed..];
                    if !ALLOWED_TAGS.contains(&tag.name.as_str()) {
                        // Disallowed tag: drop it, keep surrounding text.
                        continue;
                    }
                    if tag.closing {
                        if let Some(pos) = open_stack.iter().rposition(|t| *t == tag.name) {
                            // Auto-close anything the stray closer skips.
                            while open_stack.len() > pos + 1 {
                                let inner = open_stack.pop().unwrap();
                                output.push_str(&format!("</{inner}>"));
                            }
                            open_stack.pop();
                            output.push_str(&format!("</{}>", tag.name));
                        }
                        // Closer with no matching opener: dropped.
                    } else if tag.name == "a" {
                        match tag.href {
                            Some(href) => {
                                // Decode first so re-sanitising an already
                                // escaped href stays stable.
                                let decoded = html_escape::decode_html_entities(&href);
                                let escaped =
                                    html_escape::encode_double_quoted_attribute(&decoded);
                                output.push_str(&format!("<a href=\"{escaped}\">"));
                                open_stack.push("a".to_string());
                            }
                            // A link without a target renders as plain text.
                            None => {}
                        }
                    } else {
                        output.push_str(&format!("<{}>", tag.name));
                        open_stack.push(tag.name);
                    }
                }
            },
        }
    }
    output.push_str(rest);

    while let Some(tag) = open_stack.pop() {
        output.push_str(&format!("</{tag}>"));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelisted_tags_survive() {
        assert_eq!(sanitise("<b>bold</b> and <i>italic</i>"), "<b>bold</b> and <i>italic</i>");
        assert_eq!(sanitise("<code>x = 1</code>"), "<code>x = 1</code>");
    }

    #[test]
    fn test_disallowed_tags_stripped_text_kept() {
        assert_eq!(sanitise("<script>alert(1)</script>"), "alert(1)");
        assert_eq!(sanitise("<div><p>text</p></div>"), "text");
        assert_eq!(sanitise("<h1>header</h1>"), "header");
    }

    #[test]
    fn test_unclosed_tags_balanced() {
        assert_eq!(sanitise("<b>bold"), "<b>bold</b>");
        assert_eq!(sanitise("<b><i>both"), "<b><i>both</i></b>");
    }

    #[test]
    fn test_stray_closers_dropped() {
        assert_eq!(sanitise("text</b>"), "text");
    }

    #[test]
    fn test_misnested_tags_auto_close() {
        assert_eq!(sanitise("<b><i>x</b>"), "<b><i>x</i></b>");
    }

    #[test]
    fn test_entities_escape_idempotently() {
        assert_eq!(sanitise("a & b"), "a &amp; b");
        assert_eq!(sanitise("a &amp; b"), "a &amp; b");
        assert_eq!(sanitise("5 > 3"), "5 &gt; 3");
        assert_eq!(sanitise("&#128512; ok"), "&#128512; ok");
        assert_eq!(sanitise("&#x1F600; ok"), "&#x1F600; ok");
    }

    #[test]
    fn test_bare_angle_bracket_escaped() {
        assert_eq!(sanitise("a < b"), "a &lt; b");
        assert_eq!(sanitise("x <- y"), "x &lt;- y");
    }

    #[test]
    fn test_link_href_kept_other_attrs_dropped() {
        assert_eq!(
            sanitise(r#"<a href="https://example.com" onclick="evil()">link</a>"#),
            r#"<a href="https://example.com">link</a>"#
        );
    }

    #[test]
    fn test_link_without_href_becomes_text() {
        assert_eq!(sanitise("<a>just text</a>"), "just text");
    }

    #[test]
    fn test_idempotency() {
        let inputs = [
            "plain text",
            "<b>bold</b> & <i>unclosed",
            "<script>bad</script> 5 > 3 & 2 < 4",
            r#"<a href="https://example.com?a=1&b=2">x</a>"#,
            "&amp;&lt;&gt; &#39; already escaped",
        ];
        for input in inputs {
            let once = sanitise(input);
            let twice = sanitise(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_whitelisted_input_is_identity() {
        let input = "<b>x</b> <i>y</i> <code>z</code> &amp; done";
        assert_eq!(sanitise(input), input);
    }
}
