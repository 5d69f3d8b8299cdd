//! Audit sinks.

use std::sync::{Mutex, MutexGuard};

use super::AuditEvent;

/// Destination for audit events.
///
/// Implementations must not block for long: the guard calls `record` inline
/// on every decision.
pub trait AuditSink: Send + Sync {
    /// Stores one event.
    fn record(&self, event: AuditEvent);
}

/// In-memory recorder for audit events.
///
/// Stores events in a vector behind a mutex. Production deployments usually
/// forward to a persistent audit log instead.
///
/// # Example
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use policy_guard::audit::{AuditEvent, AuditEventKind, AuditSink, AuditTrail};
/// use policy_guard::{RequestContext, Verdict};
///
/// let trail = AuditTrail::new();
/// let ctx = RequestContext::builder("req-123", IpAddr::V4(Ipv4Addr::LOCALHOST)).build();
///
/// trail.record(AuditEvent::from_verdict(AuditEventKind::Evaluation, "login", &ctx, &Verdict::Allow));
///
/// assert_eq!(trail.events().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct AuditTrail {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditTrail {
    /// Creates a new empty audit trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clears all recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        // a panic while pushing cannot leave the vector inconsistent
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuditSink for AuditTrail {
    fn record(&self, event: AuditEvent) {
        self.lock().push(event);
    }
}
