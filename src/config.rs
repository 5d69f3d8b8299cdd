//! Startup configuration.
//!
//! A [`GuardConfig`] is read once from TOML and turned into a
//! [`PolicyGuard`]. Any problem is a [`ConfigError`]; the process must not
//! start serving with a guard it could not build.
//!
//! ```toml
//! [destinations]
//! hosts = ["avatars.example.com", "cdn.example.net"]
//! resolve_timeout_ms = 500
//!
//! [signature]
//! public_key = "base64 ed25519 public key"
//! hash = "sha256"
//! extract_dir = "/var/lib/app/updates/current"
//! max_payload_bytes = 67108864
//! max_entries = 1024
//!
//! [throttle]
//! sweep_every = 1024
//!
//! [policies.login]
//! checks = ["throttle"]
//! throttle = { limit = 5, window_secs = 20 }
//!
//! [policies.apply_update]
//! checks = ["ownership", "signature"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::checks::{
    AllowList, ExtractLimits, HashAlgorithm, SafeExtractor, SignaturePolicy, DEFAULT_SWEEP_EVERY,
};
use crate::clock::Clock;
use crate::error::{ConfigError, Error};
use crate::gate::{PolicyGuard, PolicyGuardBuilder, DEFAULT_RESOLVE_TIMEOUT};
use crate::policy::{
    AllowedDestination, Ownership, PolicySpec, SignedPayload, StrongCredential, Throttle,
};
use crate::resolve::Resolver;
use crate::verdict::CheckKind;

/// Largest configuration file accepted.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Top-level guard configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Outbound destination allowlist.
    #[serde(default)]
    pub destinations: Option<DestinationsConfig>,
    /// Payload signature verification and extraction.
    #[serde(default)]
    pub signature: Option<SignatureConfig>,
    /// Rate limiter housekeeping.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Named policies.
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
}

/// `[destinations]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationsConfig {
    /// Hosts reachable over https.
    pub hosts: Vec<String>,
    /// Bound on address resolution, in milliseconds.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

/// `[signature]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureConfig {
    /// Base64-encoded Ed25519 public key.
    pub public_key: String,
    /// Digest the signer signs; only `sha256` is supported.
    #[serde(default = "default_hash")]
    pub hash: String,
    /// Directory verified archives are extracted into.
    #[serde(default)]
    pub extract_dir: Option<PathBuf>,
    /// Largest payload accepted for verification.
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,
    /// Largest number of archive entries.
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Largest total extracted size.
    #[serde(default)]
    pub max_extract_bytes: Option<u64>,
}

/// `[throttle]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Hits between sweeps of idle throttle windows.
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sweep_every: default_sweep_every(),
        }
    }
}

/// `[policies.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Checks in evaluation order.
    pub checks: Vec<CheckKind>,
    /// Parameters for the `throttle` check.
    #[serde(default)]
    pub throttle: Option<ThrottleParams>,
}

/// Inline throttle parameters of a policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleParams {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Counter scope; defaults to the policy name.
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_resolve_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_RESOLVE_TIMEOUT.as_millis()).unwrap_or(500)
}

fn default_hash() -> String {
    "sha256".to_string()
}

fn default_sweep_every() -> u64 {
    DEFAULT_SWEEP_EVERY
}

impl GuardConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML, unknown fields, or
    /// unknown check names.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text).map_err(ConfigError::from)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read or is too large,
    /// and [`ConfigError::Parse`] if it is not a valid configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = fs::metadata(path).map_err(io_err)?.len();
        if size > MAX_CONFIG_FILE_SIZE {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "configuration file exceeds 1 MiB",
            ))
            .into());
        }
        let text = fs::read_to_string(path).map_err(io_err)?;
        Self::from_toml_str(&text)
    }

    /// Turns the configuration into a builder with default collaborators.
    ///
    /// Callers can still attach a clock, resolver, or audit sink before
    /// building.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid hosts, keys, hash names,
    /// throttle parameters, or an empty policy table entry.
    pub fn to_builder(&self) -> Result<PolicyGuardBuilder, Error> {
        let mut builder = PolicyGuard::builder().sweep_every(self.throttle.sweep_every);

        if let Some(dest) = &self.destinations {
            if dest.resolve_timeout_ms == 0 {
                return Err(ConfigError::ZeroLimit("destinations.resolve_timeout_ms").into());
            }
            builder = builder
                .allow_list(AllowList::new(&dest.hosts)?)
                .resolve_timeout(Duration::from_millis(dest.resolve_timeout_ms));
        }

        if let Some(sig) = &self.signature {
            builder = apply_signature(builder, sig)?;
        }

        for (name, policy) in &self.policies {
            builder = builder.policy(policy_spec(name, policy)?);
        }
        Ok(builder)
    }
}

fn apply_signature(
    mut builder: PolicyGuardBuilder,
    sig: &SignatureConfig,
) -> Result<PolicyGuardBuilder, ConfigError> {
    let hash = HashAlgorithm::parse(&sig.hash)?;
    let mut policy = SignaturePolicy::from_base64(&sig.public_key, hash)?;
    if let Some(max) = sig.max_payload_bytes {
        if max == 0 {
            return Err(ConfigError::ZeroLimit("signature.max_payload_bytes"));
        }
        policy = policy.with_max_payload_bytes(max);
    }
    builder = builder.signature(policy);

    if sig.extract_dir.is_none() {
        if sig.max_entries.is_some() {
            return Err(ConfigError::MissingExtractDir("max_entries"));
        }
        if sig.max_extract_bytes.is_some() {
            return Err(ConfigError::MissingExtractDir("max_extract_bytes"));
        }
    }
    if let Some(dir) = &sig.extract_dir {
        let mut limits = ExtractLimits::default();
        if let Some(max) = sig.max_entries {
            if max == 0 {
                return Err(ConfigError::ZeroLimit("signature.max_entries"));
            }
            limits.max_entries = max;
        }
        if let Some(max) = sig.max_extract_bytes {
            if max == 0 {
                return Err(ConfigError::ZeroLimit("signature.max_extract_bytes"));
            }
            limits.max_total_bytes = max;
        }
        builder = builder.extractor(SafeExtractor::new(dir).with_limits(limits));
    }
    Ok(builder)
}

fn policy_spec(name: &str, policy: &PolicyConfig) -> Result<PolicySpec, ConfigError> {
    if policy.checks.is_empty() {
        return Err(ConfigError::EmptyPolicy(name.to_string()));
    }
    let throttled = policy.checks.contains(&CheckKind::Throttle);
    if policy.throttle.is_some() && !throttled {
        return Err(ConfigError::UnusedThrottle(name.to_string()));
    }

    let mut spec = PolicySpec::new(name);
    for kind in &policy.checks {
        spec = match kind {
            CheckKind::Ownership => spec.require(Ownership),
            CheckKind::Credential => spec.require(StrongCredential),
            CheckKind::Destination => spec.require(AllowedDestination),
            CheckKind::Signature => spec.require(SignedPayload),
            CheckKind::Throttle => {
                let params = policy
                    .throttle
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingThrottle(name.to_string()))?;
                let mut throttle =
                    Throttle::new(params.limit, Duration::from_secs(params.window_secs));
                if let Some(scope) = &params.scope {
                    throttle = throttle.scoped(scope.clone());
                }
                spec.require(throttle)
            }
        };
    }
    Ok(spec)
}

impl PolicyGuard {
    /// Builds a guard from configuration with the system clock and resolver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn from_config(config: &GuardConfig) -> Result<Self, Error> {
        config.to_builder()?.build()
    }

    /// Builds a guard from configuration with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn from_config_with(
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self, Error> {
        config.to_builder()?.clock(clock).resolver(resolver).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_tables_are_omitted() {
        let config = GuardConfig::from_toml_str(
            r#"
            [policies.view]
            checks = ["ownership"]
            "#,
        )
        .unwrap();
        assert_eq!(config.throttle.sweep_every, 1024);
        assert!(config.destinations.is_none());
        assert_eq!(config.policies["view"].checks, vec![CheckKind::Ownership]);
    }

    #[test]
    fn unknown_check_name_is_a_parse_error() {
        let err = GuardConfig::from_toml_str(
            r#"
            [policies.view]
            checks = ["telepathy"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let err = GuardConfig::from_toml_str(
            r#"
            [destinations]
            hosts = ["a.example.com"]
            allow_http = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn throttle_check_needs_parameters() {
        let config = GuardConfig::from_toml_str(
            r#"
            [policies.login]
            checks = ["throttle"]
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_builder().unwrap_err(),
            Error::Config(ConfigError::MissingThrottle(name)) if name == "login"
        ));
    }

    #[test]
    fn throttle_parameters_need_the_check() {
        let config = GuardConfig::from_toml_str(
            r#"
            [policies.login]
            checks = ["credential"]
            throttle = { limit = 5, window_secs = 20 }
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_builder().unwrap_err(),
            Error::Config(ConfigError::UnusedThrottle(_))
        ));
    }

    #[test]
    fn empty_checks_list_is_rejected() {
        let config = GuardConfig::from_toml_str(
            r#"
            [policies.open]
            checks = []
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_builder().unwrap_err(),
            Error::Config(ConfigError::EmptyPolicy(_))
        ));
    }

    #[test]
    fn bad_public_key_is_rejected() {
        let config = GuardConfig::from_toml_str(
            r#"
            [signature]
            public_key = "definitely not base64!"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_builder().unwrap_err(),
            Error::Config(ConfigError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn zero_resolve_timeout_is_rejected() {
        let config = GuardConfig::from_toml_str(
            r#"
            [destinations]
            hosts = ["a.example.com"]
            resolve_timeout_ms = 0
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_builder().unwrap_err(),
            Error::Config(ConfigError::ZeroLimit(_))
        ));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = GuardConfig::from_path("/nonexistent/policy-guard.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/policy-guard.toml"));
    }
}
