//! Audit records for guard decisions.
//!
//! This module provides:
//! - `AuditEvent`: one record per evaluation or archive admission
//! - `AuditSink`: where records go besides the `tracing` pipeline
//! - `AuditTrail`: in-memory sink for tests and small deployments
//!
//! Records carry identifiers and outcomes only:
//! - no parameter values (passwords, URLs, payload bytes)
//! - no denial details, which may describe the rejected input

mod event;
mod trail;

pub use event::{AuditEvent, AuditEventKind, AuditOutcome};
pub use trail::{AuditSink, AuditTrail};
