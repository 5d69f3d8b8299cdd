use std::fmt;

/// Untrusted request input that has not passed through a guard or sanitizer.
///
/// Destination URLs, archive payloads, and signatures arrive in a
/// [`RequestContext`](crate::RequestContext) as `Tainted` values. Only code
/// inside this crate (checks and [`Sanitizer`](crate::Sanitizer)
/// implementations) can look inside, so a handler cannot pass the raw value to
/// a network call or the filesystem without going through a verdict first.
///
/// # Examples
///
/// ```
/// use policy_guard::Tainted;
///
/// let url = Tainted::new("http://169.254.169.254/latest/meta-data/".to_string());
/// assert!(format!("{url:?}").starts_with("Tainted"));
/// ```
// BREAKING CHANGE WARNING: Do NOT remove Clone - request contexts are cloned across policy evaluations.
#[derive(Clone)]
pub struct Tainted<T> {
    // BREAKING CHANGE WARNING: This field MUST remain private (CWE-20).
    inner: T,
}

impl<T> Tainted<T> {
    /// Marks a value as untrusted.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Borrows the raw value for inspection by a check.
    ///
    /// BREAKING CHANGE WARNING: Changing visibility to `pub` lets handlers skip
    /// the guard entirely (CWE-918, CWE-22).
    pub(crate) fn peek(&self) -> &T {
        &self.inner
    }

    /// Consumes the wrapper for sanitization.
    pub(crate) fn into_inner(self) -> T {
        self.inner
    }
}

// BREAKING CHANGE WARNING: Do NOT add Deref, AsRef, Borrow, From<T>, or Into<T>.

impl<T: fmt::Debug> fmt::Debug for Tainted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tainted")
            .field("inner", &self.inner)
            .finish()
    }
}
