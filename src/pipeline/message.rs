//! Helpers for reading parsed messages: body text, sender, allowlist matching.

use mail_parser::{MimeHeaders, PartType};

/// Check a From header against the trusted-sender list.
///
/// Matching is case-insensitive substring containment on the whole header,
/// display name included. An empty list trusts nobody.
pub fn is_sender_trusted(trusted: &[String], from_header: &str) -> bool {
    let header = from_header.to_lowercase();
    trusted
        .iter()
        .map(|t| t.trim().to_lowercase())
        .any(|t| !t.is_empty() && header.contains(&t))
}

/// Raw text of the From header, or an empty string.
pub fn from_header(message: &mail_parser::Message<'_>) -> String {
    message
        .header_raw("From")
        .map(|h| h.trim().to_string())
        .unwrap_or_default()
}

/// Address of the first From mailbox, if it parses.
pub fn sender_address(message: &mail_parser::Message<'_>) -> Option<String> {
    message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
}

/// Extract the plain-text body of a message.
///
/// Prefers the first `text/plain` part anywhere in the MIME tree (the parser
/// has already decoded its declared charset, lossily where needed). Falls
/// back to the primary text body, then to the HTML body with tags stripped.
pub fn extract_plain_text(message: &mail_parser::Message<'_>) -> String {
    let first_plain = message.parts.iter().find_map(|part| {
        let is_plain = match part.content_type() {
            Some(ct) => {
                ct.ctype().eq_ignore_ascii_case("text")
                    && ct
                        .subtype()
                        .is_some_and(|s| s.eq_ignore_ascii_case("plain"))
            }
            // RFC 2045 default for parts without a Content-Type.
            None => true,
        };
        match &part.body {
            PartType::Text(text) if is_plain && !text.is_empty() => Some(text.to_string()),
            _ => None,
        }
    });
    if let Some(text) = first_plain {
        return text;
    }
    if let Some(text) = message.body_text(0) {
        return text.into_owned();
    }
    if let Some(html) = message.body_html(0) {
        return strip_html(&html);
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
