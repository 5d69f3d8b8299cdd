//! Audit event schema.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use crate::request::RequestContext;
use crate::verdict::{CheckKind, DenyReason, Verdict};

/// What the guard was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A named policy was evaluated
    Evaluation,
    /// A signed archive was verified and unpacked
    ArchiveAdmission,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::Evaluation => write!(f, "evaluation"),
            AuditEventKind::ArchiveAdmission => write!(f, "archive_admission"),
        }
    }
}

/// Outcome of an audited decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The request was allowed
    Allowed,
    /// The request was denied
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Allowed => write!(f, "allowed"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// A structured record of one guard decision.
///
/// # Safety Invariants
///
/// - No parameter values are stored
/// - No denial details are stored
/// - Only identifiers, the source address, and the outcome
///
/// # Example
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use policy_guard::audit::{AuditEvent, AuditEventKind, AuditOutcome};
/// use policy_guard::{Principal, RequestContext, Verdict};
///
/// let ctx = RequestContext::builder("req-123", IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)))
///     .actor(Principal::user("user-1", "Alice"))
///     .password("hunter2")
///     .build();
///
/// let event = AuditEvent::from_verdict(AuditEventKind::Evaluation, "signup", &ctx, &Verdict::Allow);
///
/// assert_eq!(event.request_id(), "req-123");
/// assert_eq!(event.principal(), Some("user-1"));
/// assert_eq!(event.outcome(), AuditOutcome::Allowed);
/// assert!(!format!("{event:?}").contains("hunter2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    request_id: String,
    principal: Option<String>,
    source: IpAddr,
    kind: AuditEventKind,
    policy: String,
    outcome: AuditOutcome,
    reason: Option<DenyReason>,
    check: Option<CheckKind>,
    resource_id: Option<String>,
}

impl AuditEvent {
    /// Builds the record for `verdict` on `ctx` under `policy`.
    pub fn from_verdict(
        kind: AuditEventKind,
        policy: impl Into<String>,
        ctx: &RequestContext,
        verdict: &Verdict,
    ) -> Self {
        let denial = verdict.denial();
        Self {
            request_id: ctx.request_id().to_string(),
            principal: ctx.actor().map(|p| p.id.clone()),
            source: ctx.source(),
            kind,
            policy: policy.into(),
            outcome: if verdict.is_allowed() {
                AuditOutcome::Allowed
            } else {
                AuditOutcome::Denied
            },
            reason: denial.map(|d| d.reason()),
            check: denial.and_then(|d| d.check()),
            resource_id: ctx.target().map(|r| r.id.clone()),
        }
    }

    /// Returns the request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the actor id, if the request was authenticated.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Returns the request source address.
    pub fn source(&self) -> IpAddr {
        self.source
    }

    /// Returns the event kind.
    pub fn kind(&self) -> AuditEventKind {
        self.kind
    }

    /// Returns the evaluated policy name.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Returns the outcome.
    pub fn outcome(&self) -> AuditOutcome {
        self.outcome
    }

    /// Returns the deny reason, for denials.
    pub fn reason(&self) -> Option<DenyReason> {
        self.reason
    }

    /// Returns the check that denied, if known.
    pub fn check(&self) -> Option<CheckKind> {
        self.check
    }

    /// Returns the targeted resource id, if any.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent[kind={}, outcome={}, request_id={}, principal={}, source={}, policy={}",
            self.kind,
            self.outcome,
            self.request_id,
            self.principal.as_deref().unwrap_or("<none>"),
            self.source,
            self.policy
        )?;

        if let Some(reason) = self.reason {
            write!(f, ", reason={}", reason)?;
        }
        if let Some(check) = self.check {
            write!(f, ", check={}", check)?;
        }
        if let Some(resource_id) = &self.resource_id {
            write!(f, ", resource_id={}", resource_id)?;
        }

        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Principal, ResourceRef};
    use crate::verdict::Denial;
    use std::net::Ipv4Addr;

    fn ctx() -> RequestContext {
        RequestContext::builder("req-77", IpAddr::V4(Ipv4Addr::new(198, 51, 100, 20)))
            .actor(Principal::user("user-a", "Ann"))
            .target(ResourceRef::new("doc-9", "user-b"))
            .url("https://internal.example/secret-path")
            .build()
    }

    #[test]
    fn denial_fields_are_recorded() {
        let verdict = Verdict::Deny(
            Denial::new(DenyReason::Unauthenticated, "ownership mismatch")
                .from_check(CheckKind::Ownership),
        );
        let event = AuditEvent::from_verdict(AuditEventKind::Evaluation, "read_doc", &ctx(), &verdict);

        assert_eq!(event.outcome(), AuditOutcome::Denied);
        assert_eq!(event.reason(), Some(DenyReason::Unauthenticated));
        assert_eq!(event.check(), Some(CheckKind::Ownership));
        assert_eq!(event.resource_id(), Some("doc-9"));
        assert_eq!(event.policy(), "read_doc");
    }

    #[test]
    fn display_omits_parameters_and_details() {
        let verdict = Verdict::deny(DenyReason::ForbiddenDestination, "host internal.example not allowed");
        let event = AuditEvent::from_verdict(AuditEventKind::Evaluation, "fetch", &ctx(), &verdict);

        let display = event.to_string();
        assert!(display.contains("reason=FORBIDDEN_DESTINATION"));
        assert!(display.contains("source=198.51.100.20"));
        assert!(!display.contains("secret-path"));
        assert!(!display.contains("not allowed"));
    }

    #[test]
    fn unauthenticated_event_has_no_principal() {
        let anon = RequestContext::builder("req-anon", IpAddr::V4(Ipv4Addr::LOCALHOST)).build();
        let event = AuditEvent::from_verdict(
            AuditEventKind::ArchiveAdmission,
            "update",
            &anon,
            &Verdict::deny(DenyReason::InvalidSignature, "signature missing"),
        );

        assert!(event.principal().is_none());
        assert!(event.to_string().contains("<none>"));
        assert_eq!(event.kind().to_string(), "archive_admission");
    }
}
