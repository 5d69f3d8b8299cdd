use std::fmt;

use crate::check::Check;
use crate::request::{params, RequestContext};
use crate::secret::Secret;
use crate::verdict::{CheckKind, Denial, DenyReason, Verdict};

/// Minimum credential length, counted in characters.
pub const MIN_CREDENTIAL_LEN: usize = 12;

/// A strength rule a candidate credential failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialRule {
    /// Fewer than [`MIN_CREDENTIAL_LEN`] characters
    TooShort,
    /// No ASCII lowercase letter
    MissingLowercase,
    /// No ASCII uppercase letter
    MissingUppercase,
    /// No ASCII digit
    MissingDigit,
    /// No character outside `[A-Za-z0-9]`
    MissingSymbol,
}

impl fmt::Display for CredentialRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "must be at least {MIN_CREDENTIAL_LEN} characters long"),
            Self::MissingLowercase => write!(f, "must include a lowercase letter"),
            Self::MissingUppercase => write!(f, "must include an uppercase letter"),
            Self::MissingDigit => write!(f, "must include a digit"),
            Self::MissingSymbol => write!(f, "must include a character that is not a letter or digit"),
        }
    }
}

/// Returns every strength rule `candidate` fails, in a fixed order.
///
/// An empty result means the credential is acceptable.
///
/// ```
/// use policy_guard::{assess_credential, CredentialRule, Secret};
///
/// let failed = assess_credential(&Secret::new("password".to_string()));
/// assert!(failed.contains(&CredentialRule::TooShort));
/// assert!(failed.contains(&CredentialRule::MissingDigit));
/// assert!(assess_credential(&Secret::new("Correct-Horse-9".to_string())).is_empty());
/// ```
pub fn assess_credential(candidate: &Secret<String>) -> Vec<CredentialRule> {
    let value = candidate.expose_secret();
    let mut failed = Vec::new();

    if value.chars().count() < MIN_CREDENTIAL_LEN {
        failed.push(CredentialRule::TooShort);
    }
    if !value.chars().any(|c| c.is_ascii_lowercase()) {
        failed.push(CredentialRule::MissingLowercase);
    }
    if !value.chars().any(|c| c.is_ascii_uppercase()) {
        failed.push(CredentialRule::MissingUppercase);
    }
    if !value.chars().any(|c| c.is_ascii_digit()) {
        failed.push(CredentialRule::MissingDigit);
    }
    if !value.chars().any(|c| !c.is_ascii_alphanumeric()) {
        failed.push(CredentialRule::MissingSymbol);
    }
    failed
}

/// Rejects weak passwords before the caller hashes or stores them.
///
/// Reads the [`params::PASSWORD`] parameter, which must have been attached as
/// a [`Secret`]. Details list the failed rules; the candidate itself is never
/// echoed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialCheck;

impl Check for CredentialCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Credential
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let Some(candidate) = ctx.params().secret(params::PASSWORD) else {
            return Verdict::deny(DenyReason::MalformedInput, "password parameter missing");
        };

        let failed = assess_credential(candidate);
        if failed.is_empty() {
            return Verdict::Allow;
        }
        Verdict::Deny(Denial::with_details(
            DenyReason::WeakCredential,
            failed.iter().map(ToString::to_string).collect(),
        ))
    }
}
