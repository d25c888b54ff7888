//! Verification code extraction from the connect page

use regex::Regex;
use std::sync::OnceLock;

fn code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?i)<div\s+id="verification-code">\s*([0-9A-Za-z]+)\s*</div>"#).ok()
        })
        .as_ref()
}

/// Pull the code out of `<div id="verification-code">…</div>`
pub fn extract_verification_code(html: &str) -> Option<String> {
    code_pattern()?
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_code_with_whitespace() {
        let html = r#"<html><body><div id="verification-code">  482913 </div></body></html>"#;
        assert_eq!(extract_verification_code(html), Some("482913".into()));
    }

    #[test]
    fn test_case_insensitive_and_alphanumeric() {
        let html = "<DIV  id=\"verification-code\">\nAb12Z\n</DIV>";
        assert_eq!(extract_verification_code(html), Some("Ab12Z".into()));
    }

    #[test]
    fn test_missing_element() {
        assert_eq!(extract_verification_code("<html><body>Loading</body></html>"), None);
        assert_eq!(
            extract_verification_code(r#"<div id="verification-code"></div>"#),
            None
        );
    }
}
