use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::check::Check;
use crate::error::ConfigError;
use crate::request::{params, RequestContext};
use crate::verdict::{CheckKind, Denial, DenyReason, Verdict};

/// Default upper bound on payload size (64 MiB).
pub(crate) const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Content-hash algorithm the signer applies before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Parses an algorithm name (`sha256`, case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedHash`] for any other name.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(ConfigError::UnsupportedHash(name.to_string())),
        }
    }

    /// Returns the digest of `payload`.
    pub fn digest(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(payload).to_vec(),
        }
    }
}

/// Verification key and hash algorithm for detached payload signatures.
///
/// A signature is valid when it is a strict Ed25519 signature, under the
/// configured key, over `hash(payload)`.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    key: VerifyingKey,
    hash: HashAlgorithm,
    max_payload_bytes: usize,
}

impl SignaturePolicy {
    /// Creates a policy from a parsed key.
    pub fn new(key: VerifyingKey, hash: HashAlgorithm) -> Self {
        Self {
            key,
            hash,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Creates a policy from a base64-encoded 32-byte Ed25519 public key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPublicKey`] if the key does not decode.
    pub fn from_base64(key_b64: &str, hash: HashAlgorithm) -> Result<Self, ConfigError> {
        let bytes = Base64
            .decode(key_b64.trim())
            .map_err(|_| ConfigError::InvalidPublicKey("key is not valid base64".to_string()))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ConfigError::InvalidPublicKey(format!("expected 32 key bytes, got {}", bytes.len()))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| ConfigError::InvalidPublicKey("not an ed25519 point".to_string()))?;
        Ok(Self::new(key, hash))
    }

    /// Sets the largest payload accepted for verification.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Returns the configured hash algorithm.
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// Returns the largest payload accepted.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Verifies `signature` over `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`DenyReason::MalformedInput`] for oversized payloads and
    /// [`DenyReason::InvalidSignature`] for malformed or non-matching signatures.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), Denial> {
        if payload.len() > self.max_payload_bytes {
            return Err(Denial::new(
                DenyReason::MalformedInput,
                format!("payload exceeds {} bytes", self.max_payload_bytes),
            ));
        }
        let signature = Signature::try_from(signature)
            .map_err(|_| invalid("signature is malformed"))?;
        let digest = self.hash.digest(payload);
        self.key
            .verify_strict(&digest, &signature)
            .map_err(|_| invalid("signature does not match payload"))
    }
}

/// Verifies the detached signature on a request payload.
///
/// Reads [`params::PAYLOAD`] (bytes) and [`params::SIGNATURE`] (base64 text or
/// raw bytes). Nothing else may touch the payload until this check allows.
#[derive(Debug, Clone)]
pub struct SignatureCheck {
    policy: Arc<SignaturePolicy>,
}

impl SignatureCheck {
    /// Creates the check.
    pub fn new(policy: Arc<SignaturePolicy>) -> Self {
        Self { policy }
    }

    /// Returns the policy used for verification.
    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }
}

impl Check for SignatureCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Signature
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let Some(payload) = ctx.params().bytes(params::PAYLOAD) else {
            return Verdict::Deny(invalid("payload missing"));
        };
        let signature = match signature_bytes(ctx) {
            Ok(bytes) => bytes,
            Err(denial) => return Verdict::Deny(denial),
        };
        match self.policy.verify(payload, &signature) {
            Ok(()) => Verdict::Allow,
            Err(denial) => Verdict::Deny(denial),
        }
    }
}

fn signature_bytes(ctx: &RequestContext) -> Result<Vec<u8>, Denial> {
    let values = ctx.params();
    if let Some(text) = values.text(params::SIGNATURE) {
        return Base64
            .decode(text.trim())
            .map_err(|_| invalid("signature is not valid base64"));
    }
    values
        .bytes(params::SIGNATURE)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| invalid("signature missing"))
}

fn invalid(detail: &str) -> Denial {
    Denial::new(DenyReason::InvalidSignature, detail)
}
