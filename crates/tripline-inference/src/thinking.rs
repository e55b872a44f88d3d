//! Reasoning-block removal for models that emit `<think>...</think>`.

use std::sync::OnceLock;

use regex::Regex;

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"))
}

/// Remove reasoning blocks and return the answer text, trimmed.
///
/// A stray closing tag (opening tag cut off by the server) drops everything
/// before it. An unterminated opening block drops everything after it.
///
/// ```
/// use tripline_inference::thinking::strip_thinking;
///
/// assert_eq!(strip_thinking("<think>hmm</think>\n{\"a\": 1}"), "{\"a\": 1}");
/// assert_eq!(strip_thinking("plain"), "plain");
/// ```
pub fn strip_thinking(response: &str) -> String {
    let stripped = think_block().replace_all(response, "");
    let mut text: &str = &stripped;
    if let Some(pos) = text.rfind("</think>") {
        text = &text[pos + "</think>".len()..];
    }
    if let Some(pos) = text.find("<think>") {
        text = &text[..pos];
    }
    text.trim().to_string()
}

/// True when the response carries an explicit reasoning block.
pub fn has_thinking(response: &str) -> bool {
    response.contains("<think>") || response.contains("</think>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_multiple_blocks() {
        let input = "<think>one</think>A<think>two\nlines</think>B";
        assert_eq!(strip_thinking(input), "AB");
    }

    #[test]
    fn test_stray_closing_tag() {
        assert_eq!(strip_thinking("reasoning leaked</think> [1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_unterminated_block() {
        assert_eq!(strip_thinking("answer <think>never closed"), "answer");
    }

    #[test]
    fn test_has_thinking() {
        assert!(has_thinking("<think>x</think>y"));
        assert!(!has_thinking("y"));
    }
}
