//! Best-effort PII redaction for message bodies.
//!
//! Phone numbers (Vietnamese formats: `0…`, `84…`, `+84…` with optional
//! space, dot or dash separators) become [`PHONE_PLACEHOLDER`] and email
//! addresses become [`EMAIL_PLACEHOLDER`]. Only strings matching these
//! patterns are removed; other personal data passes through untouched.

use std::sync::LazyLock;

use regex::Regex;

pub const PHONE_PLACEHOLDER: &str = "[SDT]";
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+84|84|0)(?:[\s.\-]?\d{1,3}){2,3}[\s.\-]?\d{3,4}\b").expect("valid regex")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});

/// Replace phone numbers, then email addresses.
///
/// Neither placeholder matches either pattern, so `redact(redact(s)) ==
/// redact(s)`.
pub fn redact(text: &str) -> String {
    let without_phones = PHONE_RE.replace_all(text, PHONE_PLACEHOLDER);
    EMAIL_RE
        .replace_all(&without_phones, EMAIL_PLACEHOLDER)
        .into_owned()
}

/// True if `text` still contains something the redactor would replace.
pub fn contains_pii(text: &str) -> bool {
    PHONE_RE.is_match(text) || EMAIL_RE.is_match(text)
}
