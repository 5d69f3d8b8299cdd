use std::fmt;

/// A candidate credential or other secret carried through a request context.
///
/// Passwords submitted for the credential-strength check travel inside
/// `Secret<String>` so that no verdict detail, audit event, or log line can
/// render them by accident. The value is reachable only through
/// [`expose_secret`](Self::expose_secret).
///
/// # Security Properties
///
/// - No `Deref`, `AsRef`, `Borrow`, `Clone`, or `Copy`
/// - Debug and Display always print `[REDACTED]`, without type information
///
/// # Examples
///
/// ```
/// use policy_guard::Secret;
///
/// let candidate = Secret::new("Tr0ub4dor&3-horse".to_string());
/// assert_eq!(format!("{candidate:?}"), "[REDACTED]");
/// assert_eq!(candidate.expose_secret(), "Tr0ub4dor&3-horse");
/// ```
// BREAKING CHANGE WARNING: Do NOT add Clone, Copy, or Default derives.
// Duplicated secrets outlive the request they belong to (CWE-532).
pub struct Secret<T> {
    // BREAKING CHANGE WARNING: This field MUST remain private.
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the secret value.
    ///
    /// # Security Warning
    ///
    /// The exposed reference must not reach a formatter, log macro, or
    /// verdict detail.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
