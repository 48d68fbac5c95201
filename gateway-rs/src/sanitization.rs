//! # Log Sanitization
//!
//! Masks credentials in text before it reaches a log sink. JSON-style
//! `"Authorization"` and `"password"` values keep their key and quotes; bearer
//! tokens and `key=value` secrets are replaced outright.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use resilience::Error;

pub const REDACTED: &str = "***REDACTED***";

// Static regex patterns for sensitive information detection
static JSON_SECRET_FIELDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["Authorization", "password"]
        .iter()
        .filter_map(|field| Regex::new(&format!(r#"(?i)("{}"\s*:\s*")([^"]+)(")"#, field)).ok())
        .collect()
});

static BEARER_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(bearer)\s+[a-zA-Z0-9._~+/=\-]+").ok());

static KEY_VALUE_SECRET: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(api[_-]?key|token|secret|password)\s*=\s*[^\s&]+").ok()
});

/// Returns `input` with every recognised secret masked.
pub fn sanitize(input: &str) -> Cow<'_, str> {
    if input.is_empty() {
        return Cow::Borrowed(input);
    }

    let mut sanitized = Cow::Borrowed(input);
    for pattern in JSON_SECRET_FIELDS.iter() {
        if pattern.is_match(&sanitized) {
            let replaced = pattern
                .replace_all(&sanitized, format!("${{1}}{}${{3}}", REDACTED).as_str())
                .into_owned();
            sanitized = Cow::Owned(replaced);
        }
    }
    if let Some(pattern) = BEARER_TOKEN.as_ref() {
        if pattern.is_match(&sanitized) {
            let replaced = pattern
                .replace_all(&sanitized, format!("${{1}} {}", REDACTED).as_str())
                .into_owned();
            sanitized = Cow::Owned(replaced);
        }
    }
    if let Some(pattern) = KEY_VALUE_SECRET.as_ref() {
        if pattern.is_match(&sanitized) {
            let replaced = pattern
                .replace_all(&sanitized, format!("${{1}}={}", REDACTED).as_str())
                .into_owned();
            sanitized = Cow::Owned(replaced);
        }
    }
    sanitized
}

/// Sanitized rendering of an error and its context for logs.
pub fn describe_error(error: &Error) -> String {
    let mut text = error.to_string();
    if !error.context.is_empty() {
        text.push_str(" context=");
        text.push_str(&serde_json::Value::Object(error.context.clone()).to_string());
    }
    sanitize(&text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilience::ErrorKind;

    #[test]
    fn test_masks_json_fields() {
        let input = r#"{"headers": {"Authorization": "Bearer abc.def"}, "password": "hunter2"}"#;
        let output = sanitize(input);

        assert_eq!(
            output,
            r#"{"headers": {"Authorization": "***REDACTED***"}, "password": "***REDACTED***"}"#
        );
    }

    #[test]
    fn test_field_match_ignores_case() {
        let output = sanitize(r#"{"PASSWORD" : "x"}"#);
        assert_eq!(output, r#"{"PASSWORD" : "***REDACTED***"}"#);
    }

    #[test]
    fn test_masks_bearer_and_key_values() {
        assert_eq!(
            sanitize("sent Bearer eyJhbGciOi.abc with retry"),
            "sent Bearer ***REDACTED*** with retry"
        );
        assert_eq!(
            sanitize("GET /data?api_key=abc123&page=2"),
            "GET /data?api_key=***REDACTED***&page=2"
        );
    }

    #[test]
    fn test_clean_text_is_borrowed() {
        let output = sanitize("nothing to hide");
        assert!(matches!(output, Cow::Borrowed(_)));
        assert!(matches!(sanitize(""), Cow::Borrowed("")));
    }

    #[test]
    fn test_describe_error_sanitizes_context() {
        let error = Error::new(ErrorKind::External, "upstream rejected token=s3cr3t")
            .context("credentials", serde_json::json!({"password": "pw"}));
        let text = describe_error(&error);

        assert!(!text.contains("s3cr3t"));
        assert!(!text.contains(r#""pw""#));
        assert!(text.contains("External Service Error"));
        assert!(text.contains(REDACTED));
    }
}
