use std::time::Duration;

use crate::verdict::CheckKind;

/// A policy requirement that must be satisfied.
///
/// Requirements are compiled into checks by
/// [`PolicyGuardBuilder::build`](crate::PolicyGuardBuilder::build) and evaluated
/// in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyReq {
    /// Actor owns the target resource or is an admin
    Ownership,
    /// Candidate password meets the strength rules
    StrongCredential,
    /// Outbound URL is allow-listed and resolves to public addresses
    AllowedDestination,
    /// Source is within its throttle window
    Throttle {
        /// Requests allowed per window
        limit: u32,
        /// Window length
        window: Duration,
        /// Counter scope; defaults to the policy name
        scope: Option<String>,
    },
    /// Payload carries a valid detached signature
    SignedPayload,
}

impl PolicyReq {
    /// Returns the check this requirement compiles to.
    pub fn kind(&self) -> CheckKind {
        match self {
            PolicyReq::Ownership => CheckKind::Ownership,
            PolicyReq::StrongCredential => CheckKind::Credential,
            PolicyReq::AllowedDestination => CheckKind::Destination,
            PolicyReq::Throttle { .. } => CheckKind::Throttle,
            PolicyReq::SignedPayload => CheckKind::Signature,
        }
    }
}

/// Policy requiring the actor to own the target (or be an admin).
pub struct Ownership;

/// Policy requiring a strong candidate password.
pub struct StrongCredential;

/// Policy requiring an allow-listed, publicly resolving destination URL.
pub struct AllowedDestination;

/// Policy requiring a valid payload signature.
pub struct SignedPayload;

/// Policy limiting requests per source address.
///
/// ```
/// use std::time::Duration;
/// use policy_guard::Throttle;
///
/// // 5 login attempts per 20 seconds, shared with any other policy using "login"
/// let throttle = Throttle::new(5, Duration::from_secs(20)).scoped("login");
/// ```
#[derive(Debug, Clone)]
pub struct Throttle {
    limit: u32,
    window: Duration,
    scope: Option<String>,
}

impl Throttle {
    /// Creates a throttle allowing `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            scope: None,
        }
    }

    /// Sets the counter scope so several policies can share one budget.
    ///
    /// Every policy on one scope must use the same limit and window;
    /// [`PolicyGuardBuilder::build`](crate::PolicyGuardBuilder::build) rejects
    /// a mismatch.
    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

// Conversions to PolicyReq
impl From<Ownership> for PolicyReq {
    fn from(_: Ownership) -> Self {
        PolicyReq::Ownership
    }
}

impl From<StrongCredential> for PolicyReq {
    fn from(_: StrongCredential) -> Self {
        PolicyReq::StrongCredential
    }
}

impl From<AllowedDestination> for PolicyReq {
    fn from(_: AllowedDestination) -> Self {
        PolicyReq::AllowedDestination
    }
}

impl From<SignedPayload> for PolicyReq {
    fn from(_: SignedPayload) -> Self {
        PolicyReq::SignedPayload
    }
}

impl From<Throttle> for PolicyReq {
    fn from(t: Throttle) -> Self {
        PolicyReq::Throttle {
            limit: t.limit,
            window: t.window,
            scope: t.scope,
        }
    }
}

/// A named, ordered list of requirements.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use policy_guard::{CheckKind, Ownership, PolicySpec, Throttle};
///
/// let spec = PolicySpec::new("update_profile")
///     .require(Throttle::new(30, Duration::from_secs(60)))
///     .require(Ownership)
///     .require(Ownership); // second call is deduplicated
///
/// assert_eq!(spec.requirements().len(), 2);
/// assert!(spec.requires(CheckKind::Ownership));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySpec {
    name: String,
    requirements: Vec<PolicyReq>,
}

impl PolicySpec {
    /// Starts an empty policy called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: Vec::new(),
        }
    }

    /// Adds a requirement, deduplicating identical requirements.
    pub fn require(mut self, req: impl Into<PolicyReq>) -> Self {
        let req = req.into();
        if !self.requirements.contains(&req) {
            self.requirements.push(req);
        }
        self
    }

    /// Returns the policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the requirements in evaluation order.
    pub fn requirements(&self) -> &[PolicyReq] {
        &self.requirements
    }

    /// Returns true when any requirement compiles to `kind`.
    pub fn requires(&self, kind: CheckKind) -> bool {
        self.requirements.iter().any(|r| r.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_keep_insertion_order() {
        let spec = PolicySpec::new("fetch_avatar")
            .require(AllowedDestination)
            .require(Ownership);
        let kinds: Vec<_> = spec.requirements().iter().map(PolicyReq::kind).collect();
        assert_eq!(kinds, vec![CheckKind::Destination, CheckKind::Ownership]);
    }

    #[test]
    fn throttles_with_different_scopes_are_distinct() {
        let spec = PolicySpec::new("login")
            .require(Throttle::new(5, Duration::from_secs(20)))
            .require(Throttle::new(100, Duration::from_secs(3600)).scoped("login_daily"))
            .require(Throttle::new(5, Duration::from_secs(20)));
        assert_eq!(spec.requirements().len(), 2);
    }

    #[test]
    fn empty_spec_requires_nothing() {
        let spec = PolicySpec::new("noop");
        assert!(spec.requirements().is_empty());
        assert!(!spec.requires(CheckKind::Signature));
    }
}
