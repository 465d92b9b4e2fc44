//! Redaction of secret-looking values before they reach the logs.

/// Replacement for redacted values.
pub const REDACTED: &str = "***";

const SENSITIVE_KEY_PARTS: &[&str] = &[
  "password",
  "passwd",
  "secret",
  "token",
  "key",
  "credential",
  "auth",
  "private",
  "cert",
];

/// Whether `key` names something that should not be logged, e.g. `GITHUB_TOKEN`.
pub fn is_sensitive_key(key: &str) -> bool {
  let key = key.to_ascii_lowercase();
  SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// `value`, or [`REDACTED`] when `key` is sensitive.
pub fn redact_sensitive_value<'a>(key: &str, value: &'a str) -> &'a str {
  if is_sensitive_key(key) { REDACTED } else { value }
}
