/// A value that a [`Sanitizer`](crate::Sanitizer) has accepted.
///
/// `Verified<T>` has no public constructor: the only way to obtain one is to
/// run a [`Tainted<T>`](crate::Tainted) through a sanitizer in this crate.
///
/// ```compile_fail
/// use policy_guard::Verified;
///
/// let forged = Verified::new_unchecked("admin@example.com".to_string());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<T> {
    inner: T,
}

impl<T> Verified<T> {
    /// Wraps a value the caller has already validated.
    ///
    /// Restricted to this crate; sanitizers call it only after every rule passed.
    pub(crate) fn new_unchecked(value: T) -> Self {
        Self { inner: value }
    }

    /// Consumes the wrapper and returns the verified value.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> AsRef<T> for Verified<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}
