use crate::request::RequestContext;
use crate::verdict::{CheckKind, Verdict};

/// A single guard predicate.
///
/// Implementations must fail closed: any input they cannot interpret yields a
/// [`Verdict::Deny`], never an allow. Checks are shared across threads and
/// evaluated without coordination, so any internal state must synchronize
/// itself.
///
/// # Examples
///
/// ```
/// use policy_guard::{Check, CheckKind, RequestContext, Verdict, DenyReason};
///
/// struct DenyEverything;
///
/// impl Check for DenyEverything {
///     fn kind(&self) -> CheckKind {
///         CheckKind::Ownership
///     }
///
///     fn evaluate(&self, _ctx: &RequestContext) -> Verdict {
///         Verdict::deny(DenyReason::Unauthenticated, "closed for maintenance")
///     }
/// }
/// ```
pub trait Check: Send + Sync {
    /// Identifies the check in verdicts and audit events.
    fn kind(&self) -> CheckKind;

    /// Evaluates the check against one request.
    fn evaluate(&self, ctx: &RequestContext) -> Verdict;
}
