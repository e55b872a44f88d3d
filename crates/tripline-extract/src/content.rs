//! Email body text extraction from `raw_content`.
//!
//! Raw content arrives in one of three forms: a Gmail API message (JSON with
//! a MIME part tree and URL-safe base64 bodies), an RFC 822 message, or a
//! bare text/HTML body. `text/plain` is preferred over `text/html` in both
//! structured forms; HTML is rendered to text with `html2text`.

use std::fmt;
use std::sync::OnceLock;

use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use tripline_core::{Error, Result};

/// Column width HTML is wrapped at.
const HTML_WRAP_WIDTH: usize = 100;

/// Nesting limit for multipart bodies.
const MAX_MIME_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    GmailPayload,
    Mime,
    Html,
    PlainText,
}

impl fmt::Display for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentSource::GmailPayload => "gmail_payload",
            ContentSource::Mime => "mime",
            ContentSource::Html => "html",
            ContentSource::PlainText => "plain_text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub text: String,
    pub source: ContentSource,
}

/// Extract readable body text from an email's raw content.
///
/// Fails with `InvalidInput` when the content is empty or holds no text part.
#[instrument(skip(raw), fields(subsystem = "extract", component = "content", op = "extract", raw_len = raw.len()))]
pub fn extract_content(raw: &str) -> Result<EmailContent> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("raw content is empty".to_string()));
    }

    let gmail = if trimmed.starts_with('{') {
        gmail_content(trimmed)
    } else {
        None
    };
    let extracted = gmail
        .or_else(|| looks_like_mime(trimmed).then(|| mime_content(trimmed)).flatten())
        .unwrap_or_else(|| {
            if looks_like_html(trimmed) {
                EmailContent {
                    text: html_to_text(trimmed),
                    source: ContentSource::Html,
                }
            } else {
                EmailContent {
                    text: trimmed.to_string(),
                    source: ContentSource::PlainText,
                }
            }
        });

    let text = tidy(&extracted.text);
    if text.is_empty() {
        return Err(Error::InvalidInput("no text content in email".to_string()));
    }
    debug!(source = %extracted.source, text_len = text.len(), "Extracted email content");
    Ok(EmailContent {
        text,
        source: extracted.source,
    })
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.chars().take(2_000).collect::<String>().to_ascii_lowercase();
    ["<html", "<body", "<div", "<table", "<p>", "<br", "<!doctype"]
        .iter()
        .any(|tag| head.contains(tag))
}

fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "html2text failed, stripping tags");
            tag_regex().replace_all(html, " ").into_owned()
        }
    }
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

/// Trim trailing whitespace per line and collapse runs of blank lines.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn best_part(plain: Option<String>, html: Option<String>) -> Option<String> {
    plain
        .filter(|t| !t.trim().is_empty())
        .or_else(|| html.map(|h| html_to_text(&h)))
        .filter(|t| !t.trim().is_empty())
}

// =============================================================================
// GMAIL API PAYLOAD
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    #[serde(default)]
    data: Option<String>,
}

fn gmail_content(raw: &str) -> Option<EmailContent> {
    let value: JsonValue = serde_json::from_str(raw).ok()?;
    let snippet = value
        .get("snippet")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let part_value = if let Some(payload) = value.get("payload") {
        payload.clone()
    } else if value.get("mimeType").is_some() {
        value
    } else {
        return None;
    };
    let part: GmailPart = serde_json::from_value(part_value).ok()?;

    let text = best_part(
        gmail_body(&part, "text/plain"),
        gmail_body(&part, "text/html"),
    )
    .or(snippet)?;
    Some(EmailContent {
        text,
        source: ContentSource::GmailPayload,
    })
}

/// Depth-first search for the first part of `target_mime` with body data.
fn gmail_body(part: &GmailPart, target_mime: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(target_mime) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Some(text) = decode_url_safe_base64(data) {
                return Some(text);
            }
        }
    }
    part.parts.iter().find_map(|p| gmail_body(p, target_mime))
}

/// Gmail bodies are URL-safe base64, with or without padding.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cleaned)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

// =============================================================================
// RFC 822 / MIME
// =============================================================================

fn header_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*:").expect("valid regex"))
}

fn looks_like_mime(raw: &str) -> bool {
    let first_line = raw.lines().next().unwrap_or_default();
    header_line_regex().is_match(first_line)
        && (raw.contains("\n\n") || raw.contains("\r\n\r\n"))
        && raw
            .lines()
            .take_while(|l| !l.trim().is_empty())
            .any(|l| {
                let lower = l.to_ascii_lowercase();
                lower.starts_with("content-type:")
                    || lower.starts_with("mime-version:")
                    || lower.starts_with("from:")
                    || lower.starts_with("subject:")
            })
}

struct MimePart<'a> {
    headers: Vec<(String, String)>,
    body: &'a str,
}

impl<'a> MimePart<'a> {
    fn parse(raw: &'a str) -> Self {
        let separator = raw
            .find("\r\n\r\n")
            .map(|i| (i, 4))
            .or_else(|| raw.find("\n\n").map(|i| (i, 2)));
        let (head, body) = match separator {
            Some((idx, sep)) => (&raw[..idx], &raw[idx + sep..]),
            None => (raw, ""),
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.lines() {
            if line.starts_with([' ', '\t']) {
                // Folded continuation of the previous header.
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        Self { headers, body }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Lowercase media type, defaulting to `text/plain`.
    fn media_type(&self) -> String {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    fn content_type_param(&self, param: &str) -> Option<String> {
        let ct = self.header("content-type")?;
        ct.split(';').skip(1).find_map(|p| {
            let (name, value) = p.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case(param)
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }

    fn decoded_body(&self) -> String {
        let encoding = self
            .header("content-transfer-encoding")
            .map(|e| e.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let bytes = match encoding.as_str() {
            "base64" => {
                let cleaned: String = self.body.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(&cleaned)
                    .or_else(|_| {
                        base64::engine::general_purpose::STANDARD_NO_PAD
                            .decode(cleaned.trim_end_matches('='))
                    })
                    .unwrap_or_else(|_| self.body.as_bytes().to_vec())
            }
            "quoted-printable" => decode_quoted_printable(self.body),
            _ => self.body.as_bytes().to_vec(),
        };
        let charset = self
            .content_type_param("charset")
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_default();
        decode_charset(&bytes, &charset)
    }
}

fn decode_charset(bytes: &[u8], charset: &str) -> String {
    match charset {
        "iso-8859-1" | "latin1" | "windows-1252" | "us-ascii" if std::str::from_utf8(bytes).is_err() => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decode a quoted-printable body, including soft line breaks.
pub fn decode_quoted_printable(body: &str) -> Vec<u8> {
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match (bytes.get(i + 1), bytes.get(i + 2)) {
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(&hi), Some(&lo)) => match (hex_value(hi), hex_value(lo)) {
                (Some(h), Some(l)) => {
                    out.push(h << 4 | l);
                    i += 3;
                }
                _ => {
                    out.push(b'=');
                    i += 1;
                }
            },
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[derive(Default)]
struct MimeBodies {
    plain: Option<String>,
    html: Option<String>,
}

fn collect_mime(raw: &str, depth: usize, found: &mut MimeBodies) {
    let part = MimePart::parse(raw);
    let media_type = part.media_type();

    if media_type.starts_with("multipart/") {
        let Some(boundary) = part.content_type_param("boundary") else {
            return;
        };
        if depth >= MAX_MIME_DEPTH {
            return;
        }
        let delimiter = format!("--{}", boundary);
        for section in part.body.split(delimiter.as_str()).skip(1) {
            if section.starts_with("--") {
                break;
            }
            let section = section.trim_start_matches(['\r', '\n']);
            collect_mime(section, depth + 1, found);
        }
        return;
    }

    let disposition = part
        .header("content-disposition")
        .unwrap_or_default()
        .to_ascii_lowercase();
    if disposition.starts_with("attachment") {
        return;
    }
    match media_type.as_str() {
        "text/plain" if found.plain.is_none() => found.plain = Some(part.decoded_body()),
        "text/html" if found.html.is_none() => found.html = Some(part.decoded_body()),
        _ => {}
    }
}

fn mime_content(raw: &str) -> Option<EmailContent> {
    let mut found = MimeBodies::default();
    collect_mime(raw, 0, &mut found);
    let text = best_part(found.plain, found.html)?;
    Some(EmailContent {
        text,
        source: ContentSource::Mime,
    })
}
