//! Plain-text extraction from raw RFC 822 mail.

use mail_parser::{MessageParser, MimeHeaders, PartType};

/// Readable text of a raw message.
///
/// `text/plain` parts win and are concatenated; `text/html` parts are used
/// only when no plain part exists. Attachments are skipped. A message whose
/// single part is neither plain nor HTML yields its raw body.
pub fn extract_plain_text(raw: &str) -> String {
    let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) else {
        return raw_body(raw).to_string();
    };

    let mut plain = String::new();
    let mut html = String::new();
    let mut text_parts = 0;

    for part in &parsed.parts {
        let is_attachment = part
            .content_disposition()
            .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));

        match &part.body {
            PartType::Text(text) if !is_attachment => {
                plain.push_str(text);
                text_parts += 1;
            }
            PartType::Html(text) if !is_attachment => {
                html.push_str(text);
                text_parts += 1;
            }
            _ => {}
        }
    }

    if !plain.is_empty() {
        return plain;
    }
    if !html.is_empty() {
        return html_to_text(&html);
    }
    if text_parts == 0 && !is_multipart(&parsed) {
        return raw_body(raw).to_string();
    }
    String::new()
}

fn is_multipart(parsed: &mail_parser::Message) -> bool {
    parsed
        .root_part()
        .content_type()
        .is_some_and(|ct| ct.ctype().eq_ignore_ascii_case("multipart"))
}

/// Everything after the header block.
fn raw_body(raw: &str) -> &str {
    raw.split_once("\r\n\r\n")
        .or_else(|| raw.split_once("\n\n"))
        .map(|(_, body)| body)
        .unwrap_or("")
}

/// Visible text of an HTML fragment.
///
/// Text between tags is trimmed and joined with single spaces; `script` and
/// `style` contents are dropped and common entities decoded. A bare `<` in
/// text is kept.
pub fn html_to_text(html: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut tag = String::new();
    let mut in_tag = false;
    let mut hidden: Option<&'static str> = None;

    let mut chars = html.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '<' if !in_tag && chars.peek().is_some_and(|&c| opens_tag(c)) => {
                if hidden.is_none() {
                    push_segment(&mut segments, &text);
                }
                text.clear();
                tag.clear();
                in_tag = true;
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag_name(&tag);
                match hidden {
                    Some(open) if name == format!("/{open}") => hidden = None,
                    Some(_) => {}
                    None if name == "script" => hidden = Some("script"),
                    None if name == "style" => hidden = Some("style"),
                    None => {}
                }
            }
            _ if in_tag => tag.push(ch),
            _ => text.push(ch),
        }
    }
    if hidden.is_none() && !in_tag {
        push_segment(&mut segments, &text);
    }

    segments.join(" ")
}

/// A `<` followed by anything else is literal text.
fn opens_tag(next: char) -> bool {
    next.is_ascii_alphabetic() || matches!(next, '/' | '!' | '?')
}

fn tag_name(tag: &str) -> String {
    tag.trim()
        .split(|c: char| c.is_whitespace() || c == '>')
        .next()
        .unwrap_or("")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

fn push_segment(segments: &mut Vec<String>, text: &str) {
    let decoded = decode_entities(text);
    let normalized = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        segments.push(normalized);
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let decoded = after
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&after[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
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
