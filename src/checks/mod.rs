//! Built-in checks.
//!
//! Each check is an independent predicate over a [`RequestContext`](crate::RequestContext):
//!
//! - [`OwnershipCheck`]: actor owns the target or is an admin
//! - [`CredentialCheck`]: candidate password meets the strength rules
//! - [`DestinationCheck`]: outbound URL is allow-listed and resolves publicly
//! - [`ThrottleCheck`]: per-source fixed-window rate limit
//! - [`SignatureCheck`]: detached payload signature verifies
//!
//! [`SafeExtractor`] unpacks a verified archive into a fixed directory.

mod credential;
mod destination;
mod extract;
mod ownership;
mod signature;
mod throttle;

pub use credential::{CredentialCheck, CredentialRule, MIN_CREDENTIAL_LEN, assess_credential};
pub use destination::{AllowList, DestinationCheck, PinnedDestination, is_public_address};
pub use extract::{ExtractLimits, ExtractReport, SafeExtractor};
pub use ownership::OwnershipCheck;
pub use signature::{HashAlgorithm, SignatureCheck, SignaturePolicy};
pub use throttle::{RateLimiter, ThrottleCheck, ThrottleDecision, ThrottleRule, ThrottleWindow};
pub(crate) use throttle::DEFAULT_SWEEP_EVERY;
