//! Verdicts and the closed deny-reason taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a request was denied.
///
/// The taxonomy is closed: callers map each reason to a user-facing error and
/// status, and no check may invent a reason outside this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// No actor, or the actor may not touch the target resource
    Unauthenticated,
    /// URL destination is not on the allowlist or resolves to internal space
    ForbiddenDestination,
    /// Candidate credential fails the strength rules
    WeakCredential,
    /// Throttle window for the key is exhausted
    RateLimited,
    /// Payload signature is missing, malformed, or does not verify
    InvalidSignature,
    /// Archive entry would land outside the extraction directory
    UnsafePath,
    /// Request is missing inputs, oversized, or names an unknown policy
    MalformedInput,
}

impl DenyReason {
    /// Returns the stable wire code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "UNAUTHENTICATED",
            DenyReason::ForbiddenDestination => "FORBIDDEN_DESTINATION",
            DenyReason::WeakCredential => "WEAK_CREDENTIAL",
            DenyReason::RateLimited => "RATE_LIMITED",
            DenyReason::InvalidSignature => "INVALID_SIGNATURE",
            DenyReason::UnsafePath => "UNSAFE_PATH",
            DenyReason::MalformedInput => "MALFORMED_INPUT",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identifies one of the guard's checks.
///
/// Also the vocabulary of the `checks = [...]` list in policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Actor owns the target resource or is an admin
    Ownership,
    /// Candidate password meets the strength rules
    Credential,
    /// URL destination is allow-listed and resolves to public addresses
    Destination,
    /// Source/scope key is within its throttle window
    Throttle,
    /// Payload carries a valid detached signature
    Signature,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Ownership => write!(f, "ownership"),
            CheckKind::Credential => write!(f, "credential"),
            CheckKind::Destination => write!(f, "destination"),
            CheckKind::Throttle => write!(f, "throttle"),
            CheckKind::Signature => write!(f, "signature"),
        }
    }
}

/// Outcome of a verdict without its diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Every required check passed
    Allow,
    /// At least one required check failed
    Deny,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Allow => write!(f, "ALLOW"),
            Outcome::Deny => write!(f, "DENY"),
        }
    }
}

/// Details of a denied request.
///
/// Details are human-readable and safe to display; they never contain the
/// candidate credential, payload bytes, or any other secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    reason: DenyReason,
    check: Option<CheckKind>,
    details: Vec<String>,
    retry_after: Option<Duration>,
}

impl Denial {
    /// Creates a denial with a reason and a single detail line.
    pub fn new(reason: DenyReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            check: None,
            details: vec![detail.into()],
            retry_after: None,
        }
    }

    /// Creates a denial carrying several detail lines.
    pub fn with_details(reason: DenyReason, details: Vec<String>) -> Self {
        Self {
            reason,
            check: None,
            details,
            retry_after: None,
        }
    }

    /// Tags the denial with the check that produced it.
    pub fn from_check(mut self, check: CheckKind) -> Self {
        self.check = Some(check);
        self
    }

    /// Attaches the time after which a retry may succeed.
    pub fn retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    /// Returns the deny reason.
    pub fn reason(&self) -> DenyReason {
        self.reason
    }

    /// Returns the check that denied, if the denial came from one.
    pub fn check(&self) -> Option<CheckKind> {
        self.check
    }

    /// Returns the diagnostic detail lines.
    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// Returns how long to wait before retrying, for throttle denials.
    pub fn wait(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Returns the retry wait rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(ceil_secs)
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(check) = self.check {
            write!(f, " ({check})")?;
        }
        if !self.details.is_empty() {
            write!(f, ": {}", self.details.join("; "))?;
        }
        Ok(())
    }
}

/// Result of evaluating a check or a whole policy.
///
/// # Examples
///
/// ```
/// use policy_guard::{DenyReason, Verdict};
///
/// let verdict = Verdict::deny(DenyReason::MalformedInput, "missing url parameter");
/// assert!(!verdict.is_allowed());
/// assert_eq!(verdict.reason(), Some(DenyReason::MalformedInput));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    /// The request may proceed
    Allow,
    /// The request must be rejected
    Deny(Denial),
}

impl Verdict {
    /// Shorthand for a single-detail denial.
    pub fn deny(reason: DenyReason, detail: impl Into<String>) -> Self {
        Verdict::Deny(Denial::new(reason, detail))
    }

    /// Returns `true` only for [`Verdict::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Returns the outcome without diagnostics.
    pub fn outcome(&self) -> Outcome {
        match self {
            Verdict::Allow => Outcome::Allow,
            Verdict::Deny(_) => Outcome::Deny,
        }
    }

    /// Returns the deny reason, or `None` for an allow.
    pub fn reason(&self) -> Option<DenyReason> {
        self.denial().map(Denial::reason)
    }

    /// Returns the denial, or `None` for an allow.
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(denial) => Some(denial),
        }
    }

    /// Converts the verdict into a `Result` so callers can use `?`.
    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(denial) => Err(denial),
        }
    }

    /// Tags a denial with the check that produced it; allows pass through.
    pub(crate) fn tagged(self, check: CheckKind) -> Self {
        match self {
            Verdict::Allow => Verdict::Allow,
            Verdict::Deny(denial) if denial.check.is_some() => Verdict::Deny(denial),
            Verdict::Deny(denial) => Verdict::Deny(denial.from_check(check)),
        }
    }
}

impl From<Denial> for Verdict {
    fn from(denial: Denial) -> Self {
        Verdict::Deny(denial)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "ALLOW"),
            Verdict::Deny(denial) => write!(f, "DENY {denial}"),
        }
    }
}

pub(crate) fn ceil_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(DenyReason::Unauthenticated.code(), "UNAUTHENTICATED");
        assert_eq!(DenyReason::ForbiddenDestination.code(), "FORBIDDEN_DESTINATION");
        assert_eq!(DenyReason::WeakCredential.code(), "WEAK_CREDENTIAL");
        assert_eq!(DenyReason::RateLimited.code(), "RATE_LIMITED");
        assert_eq!(DenyReason::InvalidSignature.code(), "INVALID_SIGNATURE");
        assert_eq!(DenyReason::UnsafePath.code(), "UNSAFE_PATH");
        assert_eq!(DenyReason::MalformedInput.code(), "MALFORMED_INPUT");
    }

    #[test]
    fn allow_has_no_reason() {
        let verdict = Verdict::Allow;
        assert!(verdict.is_allowed());
        assert_eq!(verdict.outcome(), Outcome::Allow);
        assert!(verdict.reason().is_none());
        assert!(verdict.into_result().is_ok());
    }

    #[test]
    fn tagging_keeps_first_check() {
        let verdict = Verdict::Deny(
            Denial::new(DenyReason::RateLimited, "window exhausted").from_check(CheckKind::Throttle),
        )
        .tagged(CheckKind::Ownership);

        assert_eq!(verdict.denial().and_then(Denial::check), Some(CheckKind::Throttle));
    }

    #[test]
    fn retry_after_rounds_up() {
        let denial = Denial::new(DenyReason::RateLimited, "slow down")
            .retry_after(Duration::from_millis(4_001));
        assert_eq!(denial.retry_after_secs(), Some(5));

        let exact = Denial::new(DenyReason::RateLimited, "slow down")
            .retry_after(Duration::from_secs(3));
        assert_eq!(exact.retry_after_secs(), Some(3));
    }

    #[test]
    fn display_joins_details() {
        let denial = Denial::with_details(
            DenyReason::WeakCredential,
            vec!["too short".to_string(), "no digit".to_string()],
        )
        .from_check(CheckKind::Credential);

        assert_eq!(
            Verdict::Deny(denial).to_string(),
            "DENY WEAK_CREDENTIAL (credential): too short; no digit"
        );
    }
}
