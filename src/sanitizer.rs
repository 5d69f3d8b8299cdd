use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};

use crate::{Tainted, Verified};

/// Error returned when sanitization fails.
///
/// This error indicates that a tainted value failed validation and could not
/// be promoted to a `Verified<T>`. The error does not leak sensitive information
/// about the rejected input.
///
/// # Examples
///
/// ```
/// use policy_guard::{SanitizationError, SanitizationErrorKind};
///
/// let error = SanitizationError::new(SanitizationErrorKind::TooLong, "value too long");
/// assert_eq!(error.kind(), SanitizationErrorKind::TooLong);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationError {
    kind: SanitizationErrorKind,
    message: String,
}

impl SanitizationError {
    /// Creates a new sanitization error.
    pub fn new(kind: SanitizationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SanitizationErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SanitizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sanitization failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for SanitizationError {}

/// Kind of sanitization error.
///
/// Categorizes why sanitization failed without leaking sensitive details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizationErrorKind {
    /// Input format is malformed.
    MalformedInput,
    /// Input is empty or contains only whitespace.
    Empty,
    /// Input exceeds maximum allowed length.
    TooLong,
    /// Input contains control or whitespace characters where none are allowed.
    ContainsControlChars,
}

impl fmt::Display for SanitizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInput => write!(f, "malformed input"),
            Self::Empty => write!(f, "empty input"),
            Self::TooLong => write!(f, "input too long"),
            Self::ContainsControlChars => write!(f, "contains control characters"),
        }
    }
}

/// Trait for sanitizing tainted values into verified values.
///
/// `Sanitizer<T>` defines the interface for converting untrusted, tainted data
/// into verified data that is safe to store or act on.
///
/// # Invariants
///
/// Implementations MUST:
/// - Validate/sanitize the input according to their policy rules
/// - Only call `Verified::new_unchecked` after validation succeeds
/// - Return `Err(SanitizationError)` if validation fails
/// - Not leak the rejected input in errors
pub trait Sanitizer<T> {
    /// Sanitizes a tainted value, returning a verified value on success.
    ///
    /// # Errors
    ///
    /// Returns `SanitizationError` if the input fails validation.
    fn sanitize(&self, input: Tainted<T>) -> Result<Verified<T>, SanitizationError>;
}

/// Longest address accepted, per RFC 5321 path limits.
const MAX_EMAIL_LEN: usize = 254;

/// Sanitizer for account email addresses.
///
/// Trims surrounding whitespace and lowercases the domain. The local part is
/// kept as given. Rejects addresses that:
///
/// - are empty or longer than 254 characters
/// - contain whitespace or control characters
/// - do not contain exactly one `@`
/// - have an empty local part, or a domain without an inner dot
///
/// # Examples
///
/// ```
/// use policy_guard::{EmailSanitizer, Sanitizer, Tainted};
///
/// let verified = EmailSanitizer
///     .sanitize(Tainted::new("  Ana.Lopez@Example.COM ".to_string()))
///     .expect("valid address");
/// assert_eq!(verified.as_ref(), "Ana.Lopez@example.com");
///
/// assert!(EmailSanitizer.sanitize(Tainted::new("not-an-address".to_string())).is_err());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailSanitizer;

impl Sanitizer<String> for EmailSanitizer {
    fn sanitize(&self, input: Tainted<String>) -> Result<Verified<String>, SanitizationError> {
        let raw = input.into_inner();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(SanitizationError::new(
                SanitizationErrorKind::Empty,
                "email address is empty",
            ));
        }
        if trimmed.chars().count() > MAX_EMAIL_LEN {
            return Err(SanitizationError::new(
                SanitizationErrorKind::TooLong,
                format!("email address exceeds {MAX_EMAIL_LEN} characters"),
            ));
        }
        if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(SanitizationError::new(
                SanitizationErrorKind::ContainsControlChars,
                "email address contains whitespace or control characters",
            ));
        }

        let mut parts = trimmed.split('@');
        let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed("email address must contain exactly one '@'"));
        };
        if local.is_empty() {
            return Err(malformed("email address has an empty local part"));
        }
        let domain = domain.to_lowercase();
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return Err(malformed("email domain must be a dotted host name"));
        }

        Ok(Verified::new_unchecked(format!("{local}@{domain}")))
    }
}

/// Preference keys accepted by [`PreferenceSanitizer::default`].
pub const DEFAULT_PREFERENCE_KEYS: &[&str] = &["theme", "notifications", "language"];

/// Sanitizer for user-supplied preference documents.
///
/// Input must be a JSON object. Only allow-listed keys whose values are
/// strings survive; everything else, including nested objects that could
/// smuggle extra state, is dropped.
///
/// # Examples
///
/// ```
/// use policy_guard::{PreferenceSanitizer, Sanitizer, Tainted};
/// use serde_json::json;
///
/// let prefs = json!({ "theme": "dark", "is_admin": "true", "language": 7 });
/// let verified = PreferenceSanitizer::default()
///     .sanitize(Tainted::new(prefs))
///     .expect("object input");
///
/// assert_eq!(verified.as_ref(), &json!({ "theme": "dark" }));
/// ```
#[derive(Debug, Clone)]
pub struct PreferenceSanitizer {
    allowed: BTreeSet<String>,
}

impl PreferenceSanitizer {
    /// Creates a sanitizer keeping only `keys`.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the accepted keys.
    pub fn allowed_keys(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl Default for PreferenceSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_PREFERENCE_KEYS.iter().copied())
    }
}

impl Sanitizer<Value> for PreferenceSanitizer {
    fn sanitize(&self, input: Tainted<Value>) -> Result<Verified<Value>, SanitizationError> {
        let Value::Object(raw) = input.into_inner() else {
            return Err(malformed("preferences must be an object"));
        };

        let kept: Map<String, Value> = raw
            .into_iter()
            .filter(|(key, value)| self.allowed.contains(key) && value.is_string())
            .collect();

        Ok(Verified::new_unchecked(Value::Object(kept)))
    }
}

fn malformed(message: &str) -> SanitizationError {
    SanitizationError::new(SanitizationErrorKind::MalformedInput, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email(raw: &str) -> Result<Verified<String>, SanitizationError> {
        EmailSanitizer.sanitize(Tainted::new(raw.to_string()))
    }

    #[test]
    fn sanitization_error_display() {
        let error = SanitizationError::new(SanitizationErrorKind::Empty, "nothing here");
        assert_eq!(error.to_string(), "sanitization failed (empty input): nothing here");
    }

    #[test]
    fn email_domain_is_lowercased_local_part_kept() {
        assert_eq!(email("Bob@MAIL.Example.org").unwrap().as_ref(), "Bob@mail.example.org");
    }

    #[test]
    fn email_rejects_missing_or_repeated_at() {
        assert_eq!(email("bob.example.org").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
        assert_eq!(email("bob@@example.org").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
        assert_eq!(email("a@b@example.org").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
    }

    #[test]
    fn email_rejects_empty_parts() {
        assert_eq!(email("   ").unwrap_err().kind(), SanitizationErrorKind::Empty);
        assert_eq!(email("@example.org").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
        assert_eq!(email("bob@localhost").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
        assert_eq!(email("bob@example.").unwrap_err().kind(), SanitizationErrorKind::MalformedInput);
    }

    #[test]
    fn email_rejects_header_injection() {
        let err = email("bob@example.org\r\nBcc: victim@example.org").unwrap_err();
        assert_eq!(err.kind(), SanitizationErrorKind::ContainsControlChars);
        assert!(!err.to_string().contains("victim"));
    }

    #[test]
    fn email_length_limit() {
        let local = "a".repeat(MAX_EMAIL_LEN - "@example.org".len());
        assert!(email(&format!("{local}@example.org")).is_ok());
        assert_eq!(
            email(&format!("a{local}@example.org")).unwrap_err().kind(),
            SanitizationErrorKind::TooLong
        );
    }

    #[test]
    fn preferences_keep_only_allowed_string_values() {
        let input = json!({
            "theme": "dark",
            "notifications": "weekly",
            "language": { "code": "es" },
            "role": "admin",
        });
        let verified = PreferenceSanitizer::default().sanitize(Tainted::new(input)).unwrap();
        assert_eq!(
            verified.into_inner(),
            json!({ "theme": "dark", "notifications": "weekly" })
        );
    }

    #[test]
    fn preferences_must_be_an_object() {
        let err = PreferenceSanitizer::default()
            .sanitize(Tainted::new(json!(["theme", "dark"])))
            .unwrap_err();
        assert_eq!(err.kind(), SanitizationErrorKind::MalformedInput);
    }

    #[test]
    fn custom_preference_keys() {
        let sanitizer = PreferenceSanitizer::new(["timezone"]);
        assert_eq!(sanitizer.allowed_keys().collect::<Vec<_>>(), vec!["timezone"]);
        let verified = sanitizer
            .sanitize(Tainted::new(json!({ "timezone": "UTC", "theme": "dark" })))
            .unwrap();
        assert_eq!(verified.as_ref(), &json!({ "timezone": "UTC" }));
    }
}
