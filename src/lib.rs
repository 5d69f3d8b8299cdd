//! Fail-closed request validation through named policies.
//!
//! This crate evaluates a named policy against an immutable request snapshot
//! and returns an allow/deny verdict with a reason from a closed taxonomy:
//! - **Checks**: independent predicates for ownership, credential strength,
//!   outbound destinations, throttling, and payload signatures
//! - **Policies**: ordered, short-circuiting conjunctions of checks
//! - **Taint tracking**: untrusted values stay wrapped until a sanitizer or
//!   check has looked at them
//!
//! # Core Types
//!
//! - [`PolicyGuard`]: holds the compiled policies and evaluates requests
//! - [`RequestContext`]: immutable snapshot of one inbound action
//! - [`Verdict`]: `Allow`, or `Deny` with a [`DenyReason`]
//! - [`Secret<T>`]: wrapper that redacts sensitive values in logs/output
//! - [`Tainted<T>`]: wrapper for untrusted data requiring sanitization
//!
//! # Examples
//!
//! ```
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use policy_guard::{
//!     DenyReason, ManualClock, PolicyGuard, PolicySpec, RequestContext, Secret, StrongCredential,
//!     Throttle,
//! };
//!
//! // Secrets are automatically redacted
//! let api_key = Secret::new("super-secret-key".to_string());
//! assert_eq!(format!("{:?}", api_key), "[REDACTED]");
//!
//! let guard = PolicyGuard::builder()
//!     .clock(Arc::new(ManualClock::new()))
//!     .policy(
//!         PolicySpec::new("signup")
//!             .require(Throttle::new(5, Duration::from_secs(20)))
//!             .require(StrongCredential),
//!     )
//!     .build()
//!     .expect("valid guard configuration");
//!
//! let source = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4));
//! let weak = RequestContext::builder("req-1", source).password("password").build();
//! assert_eq!(guard.evaluate("signup", &weak).reason(), Some(DenyReason::WeakCredential));
//!
//! let strong = RequestContext::builder("req-2", source).password("Correct-Horse-9").build();
//! assert!(guard.evaluate("signup", &strong).is_allowed());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod check;
mod checks;
mod clock;
mod config;
mod error;
mod gate;
mod policy;
mod request;
mod resolve;
mod sanitizer;
mod secret;
mod tainted;
mod verdict;
mod verified;

pub use check::Check;
pub use checks::{
    assess_credential, is_public_address, AllowList, CredentialCheck, CredentialRule,
    DestinationCheck, ExtractLimits, ExtractReport, HashAlgorithm, OwnershipCheck,
    PinnedDestination, RateLimiter, SafeExtractor, SignatureCheck, SignaturePolicy, ThrottleCheck,
    ThrottleDecision, ThrottleRule, ThrottleWindow, MIN_CREDENTIAL_LEN,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DestinationsConfig, GuardConfig, PolicyConfig, SignatureConfig, ThrottleConfig, ThrottleParams,
};
pub use error::{ConfigError, Error};
pub use gate::{PolicyGuard, PolicyGuardBuilder};
pub use policy::{
    AllowedDestination, Ownership, PolicyReq, PolicySpec, SignedPayload, StrongCredential, Throttle,
};
pub use request::{
    is_filtered_param, params, Action, ParamValue, Params, Principal, RequestContext,
    RequestContextBuilder, ResourceRef, Role,
};
pub use resolve::{ResolveError, Resolver, StaticResolver, SystemResolver};
pub use sanitizer::{
    EmailSanitizer, PreferenceSanitizer, SanitizationError, SanitizationErrorKind, Sanitizer,
    DEFAULT_PREFERENCE_KEYS,
};
pub use secret::Secret;
pub use tainted::Tainted;
pub use verdict::{CheckKind, Denial, DenyReason, Outcome, Verdict};
pub use verified::Verified;
