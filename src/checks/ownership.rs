use crate::check::Check;
use crate::request::{Action, RequestContext};
use crate::verdict::{CheckKind, DenyReason, Verdict};

/// Allows a request only when the actor owns the target resource or is an admin.
///
/// `Action::Admin` requests additionally require the admin role, so owning a
/// resource is not enough to administer it. A blank actor id or, for
/// non-admins, a blank owner id never matches.
///
/// # Examples
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use policy_guard::{Check, OwnershipCheck, Principal, RequestContext, ResourceRef};
///
/// let ctx = RequestContext::builder("req-1", IpAddr::V4(Ipv4Addr::LOCALHOST))
///     .actor(Principal::user("user-2", "Bob"))
///     .target(ResourceRef::new("user-1", "user-1"))
///     .build();
///
/// assert!(!OwnershipCheck.evaluate(&ctx).is_allowed());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipCheck;

impl Check for OwnershipCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Ownership
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let Some(actor) = ctx.actor() else {
            return Verdict::deny(DenyReason::Unauthenticated, "authentication required");
        };
        let Some(target) = ctx.target() else {
            return Verdict::deny(DenyReason::MalformedInput, "request names no target resource");
        };

        if actor.id.is_empty() {
            return Verdict::deny(DenyReason::Unauthenticated, "actor has no id");
        }
        if actor.is_admin() {
            return Verdict::Allow;
        }
        if ctx.action() == Action::Admin {
            return Verdict::deny(DenyReason::Unauthenticated, "admin role required");
        }
        if target.owner_id.is_empty() {
            return Verdict::deny(DenyReason::Unauthenticated, "resource has no owner");
        }
        if actor.id == target.owner_id {
            Verdict::Allow
        } else {
            Verdict::deny(DenyReason::Unauthenticated, "ownership mismatch")
        }
    }
}
