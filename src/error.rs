use std::path::PathBuf;

use thiserror::Error;

use crate::verdict::CheckKind;

/// Errors that can occur while setting up a [`PolicyGuard`](crate::PolicyGuard).
///
/// Request evaluation never returns an error: bad input is a
/// [`Verdict::Deny`](crate::Verdict). Only startup configuration fails, and a
/// process that sees one of these errors must not start serving.
#[derive(Debug, Error)]
pub enum Error {
    /// The guard configuration is invalid or incomplete
    #[error("invalid guard configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A configuration problem detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("unable to read {}: {source}", path.display())]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The configuration document is not valid TOML for this schema
    #[error("unable to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A policy was declared without checks
    #[error("policy '{0}' has no checks")]
    EmptyPolicy(String),
    /// Two policies share a name
    #[error("policy '{0}' is declared twice")]
    DuplicatePolicy(String),
    /// A throttle check was declared without limit/window parameters
    #[error("policy '{0}' uses the throttle check without throttle parameters")]
    MissingThrottle(String),
    /// Throttle parameters were given to a policy that does not throttle
    #[error("policy '{0}' has throttle parameters but no throttle check")]
    UnusedThrottle(String),
    /// Throttle limit or window is zero
    #[error("policy '{policy}': throttle {field} must be greater than zero")]
    InvalidThrottle {
        /// Offending policy
        policy: String,
        /// `limit` or `window`
        field: &'static str,
    },
    /// Two policies put different throttle rules on one counter scope
    #[error("throttle scope '{scope}' has different limits in policies '{first}' and '{second}'")]
    ConflictingThrottle {
        /// Shared scope
        scope: String,
        /// Policy that declared the scope first
        first: String,
        /// Policy with the conflicting rule
        second: String,
    },
    /// A check needs a collaborator that was not configured
    #[error("policy '{policy}' uses the {check} check but {missing} is not configured")]
    MissingDependency {
        /// Offending policy
        policy: String,
        /// Check that cannot be built
        check: CheckKind,
        /// What is missing
        missing: &'static str,
    },
    /// Extraction limits were configured without an extraction directory
    #[error("signature.{0} is set but signature.extract_dir is not")]
    MissingExtractDir(&'static str),
    /// The destination allowlist is empty
    #[error("destination allowlist is empty")]
    EmptyAllowList,
    /// An allowlist host is not a valid hostname or address
    #[error("invalid allowlist host '{0}'")]
    InvalidHost(String),
    /// The signature public key could not be decoded
    #[error("invalid signature public key: {0}")]
    InvalidPublicKey(String),
    /// The signature hash algorithm is not supported
    #[error("unsupported signature hash algorithm '{0}'")]
    UnsupportedHash(String),
    /// A numeric limit was set to zero
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_policy() {
        let err = Error::from(ConfigError::MissingThrottle("login".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("invalid guard configuration"));
        assert!(msg.contains("login"));
    }

    #[test]
    fn missing_dependency_names_the_check() {
        let err = ConfigError::MissingDependency {
            policy: "apply_update".to_string(),
            check: CheckKind::Signature,
            missing: "a signature key",
        };
        assert_eq!(
            err.to_string(),
            "policy 'apply_update' uses the signature check but a signature key is not configured"
        );
    }
}
