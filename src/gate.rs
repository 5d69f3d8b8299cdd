use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::check::Check;
use crate::checks::{
    AllowList, CredentialCheck, DestinationCheck, ExtractReport, OwnershipCheck, RateLimiter,
    SafeExtractor, SignatureCheck, SignaturePolicy, ThrottleCheck, ThrottleRule,
    DEFAULT_SWEEP_EVERY,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, Error};
use crate::policy::{PolicyReq, PolicySpec};
use crate::request::{params, RequestContext};
use crate::resolve::{Resolver, SystemResolver};
use crate::verdict::{CheckKind, Denial, DenyReason, Verdict};

/// Default bound on destination address resolution.
pub(crate) const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_millis(500);

struct CompiledPolicy {
    checks: Vec<Arc<dyn Check>>,
}

impl CompiledPolicy {
    fn verifies_signatures(&self) -> bool {
        self.checks.iter().any(|c| c.kind() == CheckKind::Signature)
    }
}

/// The policy enforcement guard.
///
/// A guard holds a fixed set of named policies, each an ordered list of
/// checks. [`evaluate`](Self::evaluate) runs the checks of one policy in
/// order and stops at the first denial, so a request is allowed only when
/// every check allowed it.
///
/// # Examples
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use policy_guard::{
///     DenyReason, Ownership, PolicyGuard, PolicySpec, Principal, RequestContext, ResourceRef,
/// };
///
/// let guard = PolicyGuard::builder()
///     .policy(PolicySpec::new("view_order").require(Ownership))
///     .build()
///     .expect("valid guard configuration");
///
/// let alice = Principal::user("user-a", "Alice");
/// let source = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
///
/// let own = RequestContext::builder("req-1", source)
///     .actor(alice.clone())
///     .target(ResourceRef::new("order-1", "user-a"))
///     .build();
/// assert!(guard.evaluate("view_order", &own).is_allowed());
///
/// let other = RequestContext::builder("req-2", source)
///     .actor(alice)
///     .target(ResourceRef::new("order-2", "user-b"))
///     .build();
/// assert_eq!(guard.evaluate("view_order", &other).reason(), Some(DenyReason::Unauthenticated));
/// ```
pub struct PolicyGuard {
    policies: HashMap<String, CompiledPolicy>,
    destinations: Option<Arc<DestinationCheck>>,
    limiter: Arc<RateLimiter>,
    extractor: Option<SafeExtractor>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for PolicyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.policies.keys().collect();
        names.sort();
        f.debug_struct("PolicyGuard")
            .field("policies", &names)
            .field("destinations", &self.destinations)
            .field("limiter", &self.limiter)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl PolicyGuard {
    /// Starts configuring a guard.
    pub fn builder() -> PolicyGuardBuilder {
        PolicyGuardBuilder::new()
    }

    /// Evaluates `policy` against `ctx`.
    ///
    /// Never fails: an unknown policy name, missing inputs, and every check
    /// failure are all returned as [`Verdict::Deny`].
    pub fn evaluate(&self, policy: &str, ctx: &RequestContext) -> Verdict {
        let verdict = self.run(policy, ctx);
        self.record(AuditEventKind::Evaluation, policy, ctx, &verdict);
        verdict
    }

    /// Evaluates `policy` and, if allowed, unpacks the verified payload.
    ///
    /// The policy must include the signature check; the payload is only
    /// touched after every check of the policy allowed it.
    ///
    /// # Errors
    ///
    /// Returns the denial of the first failing check, or of the extraction
    /// itself ([`DenyReason::UnsafePath`] or [`DenyReason::MalformedInput`]).
    pub fn admit_archive(&self, policy: &str, ctx: &RequestContext) -> Result<ExtractReport, Denial> {
        let result = self.admit(policy, ctx);
        let verdict = match &result {
            Ok(_) => Verdict::Allow,
            Err(denial) => Verdict::Deny(denial.clone()),
        };
        self.log_outcome(policy, ctx, &verdict);
        self.record(AuditEventKind::ArchiveAdmission, policy, ctx, &verdict);
        result
    }

    /// Returns the destination check, for [`DestinationCheck::recheck`] before use.
    pub fn destinations(&self) -> Option<&DestinationCheck> {
        self.destinations.as_deref()
    }

    /// Returns the shared rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Returns true when a policy called `name` is registered.
    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Returns the registered policy names, sorted.
    pub fn policy_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn admit(&self, policy: &str, ctx: &RequestContext) -> Result<ExtractReport, Denial> {
        let compiled = self.lookup(policy)?;
        if !compiled.verifies_signatures() {
            return Err(Denial::new(
                DenyReason::MalformedInput,
                format!("policy '{policy}' does not verify payload signatures"),
            ));
        }
        let Some(extractor) = &self.extractor else {
            return Err(Denial::new(
                DenyReason::MalformedInput,
                "no extraction directory is configured",
            ));
        };

        evaluate_checks(compiled, ctx).into_result()?;
        let payload = ctx
            .params()
            .bytes(params::PAYLOAD)
            .ok_or_else(|| Denial::new(DenyReason::InvalidSignature, "payload missing"))?;
        extractor.extract(payload)
    }

    fn run(&self, policy: &str, ctx: &RequestContext) -> Verdict {
        let verdict = match self.lookup(policy) {
            Ok(compiled) => evaluate_checks(compiled, ctx),
            Err(denial) => Verdict::Deny(denial),
        };
        self.log_outcome(policy, ctx, &verdict);
        verdict
    }

    fn lookup(&self, policy: &str) -> Result<&CompiledPolicy, Denial> {
        self.policies
            .get(policy)
            .ok_or_else(|| Denial::new(DenyReason::MalformedInput, format!("unknown policy '{policy}'")))
    }

    fn log_outcome(&self, policy: &str, ctx: &RequestContext, verdict: &Verdict) {
        match verdict {
            Verdict::Allow => tracing::info!(
                request_id = %ctx.request_id(),
                policy = %policy,
                "request allowed"
            ),
            Verdict::Deny(denial) => tracing::warn!(
                request_id = %ctx.request_id(),
                policy = %policy,
                reason = %denial.reason(),
                check = ?denial.check(),
                "request denied"
            ),
        }
    }

    fn record(&self, kind: AuditEventKind, policy: &str, ctx: &RequestContext, verdict: &Verdict) {
        let event = AuditEvent::from_verdict(kind, policy, ctx, verdict);
        tracing::info!(
            target: "policy_audit",
            request_id = %event.request_id(),
            principal = ?event.principal(),
            source = %event.source(),
            kind = %event.kind(),
            policy = %event.policy(),
            outcome = %event.outcome(),
            reason = ?event.reason(),
            check = ?event.check(),
            resource_id = ?event.resource_id(),
            "audit event"
        );
        if let Some(sink) = &self.audit {
            sink.record(event);
        }
    }
}

fn evaluate_checks(compiled: &CompiledPolicy, ctx: &RequestContext) -> Verdict {
    for check in &compiled.checks {
        let verdict = check.evaluate(ctx).tagged(check.kind());
        tracing::debug!(
            request_id = %ctx.request_id(),
            check = %check.kind(),
            outcome = %verdict.outcome(),
            "check evaluated"
        );
        if !verdict.is_allowed() {
            return verdict;
        }
    }
    Verdict::Allow
}

/// Builder for [`PolicyGuard`].
///
/// Collaborators default to the system clock and the system resolver with a
/// 500 ms timeout. Checks that need configuration (an allowlist for the
/// destination check, a key for the signature check) make
/// [`build`](Self::build) fail when it is absent.
pub struct PolicyGuardBuilder {
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn Resolver>,
    resolve_timeout: Duration,
    allow: Option<AllowList>,
    signature: Option<SignaturePolicy>,
    extractor: Option<SafeExtractor>,
    audit: Option<Arc<dyn AuditSink>>,
    sweep_every: u64,
    policies: Vec<PolicySpec>,
}

impl std::fmt::Debug for PolicyGuardBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGuardBuilder")
            .field("resolve_timeout", &self.resolve_timeout)
            .field("allow", &self.allow)
            .field("extractor", &self.extractor)
            .field("sweep_every", &self.sweep_every)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl Default for PolicyGuardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyGuardBuilder {
    /// Creates a builder with default collaborators and no policies.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            resolver: Arc::new(SystemResolver),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            allow: None,
            signature: None,
            extractor: None,
            audit: None,
            sweep_every: DEFAULT_SWEEP_EVERY,
            policies: Vec::new(),
        }
    }

    /// Sets the clock used for throttle windows.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the resolver used by the destination check.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the bound on destination address resolution.
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Sets the destination allowlist.
    pub fn allow_list(mut self, allow: AllowList) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Sets the payload signature key.
    pub fn signature(mut self, policy: SignaturePolicy) -> Self {
        self.signature = Some(policy);
        self
    }

    /// Sets the extractor used by [`PolicyGuard::admit_archive`].
    pub fn extractor(mut self, extractor: SafeExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Sends audit events to `sink` in addition to `tracing`.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Sets how many throttle hits pass between idle-window sweeps.
    pub fn sweep_every(mut self, hits: u64) -> Self {
        self.sweep_every = hits;
        self
    }

    /// Registers a policy.
    pub fn policy(mut self, spec: PolicySpec) -> Self {
        self.policies.push(spec);
        self
    }

    /// Validates the configuration and compiles every policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty or duplicate policy, invalid
    /// throttle parameters, a zero timeout or sweep interval, or a check
    /// whose collaborator is not configured.
    pub fn build(self) -> Result<PolicyGuard, Error> {
        if self.resolve_timeout.is_zero() {
            return Err(ConfigError::ZeroLimit("resolve timeout").into());
        }
        if self.sweep_every == 0 {
            return Err(ConfigError::ZeroLimit("throttle sweep interval").into());
        }

        let resolver = Arc::clone(&self.resolver);
        let timeout = self.resolve_timeout;
        let destinations = self
            .allow
            .map(|allow| Arc::new(DestinationCheck::new(allow, resolver, timeout)));
        let signatures = self.signature.map(|s| Arc::new(SignatureCheck::new(Arc::new(s))));
        let limiter = Arc::new(RateLimiter::with_sweep_interval(
            Arc::clone(&self.clock),
            self.sweep_every,
        ));

        check_throttle_scopes(&self.policies)?;

        let mut policies = HashMap::with_capacity(self.policies.len());
        for spec in &self.policies {
            if policies.contains_key(spec.name()) {
                return Err(ConfigError::DuplicatePolicy(spec.name().to_string()).into());
            }
            let compiled = compile(spec, destinations.as_ref(), signatures.as_ref(), &limiter)?;
            policies.insert(spec.name().to_string(), compiled);
        }

        tracing::debug!(policies = policies.len(), "policy guard built");
        Ok(PolicyGuard {
            policies,
            destinations,
            limiter,
            extractor: self.extractor,
            audit: self.audit,
        })
    }
}

/// Counters are shared per scope, so every rule on one scope must agree.
fn check_throttle_scopes(specs: &[PolicySpec]) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, (&str, u32, Duration)> = HashMap::new();
    for spec in specs {
        for req in spec.requirements() {
            let PolicyReq::Throttle {
                limit,
                window,
                scope,
            } = req
            else {
                continue;
            };
            let scope = scope.clone().unwrap_or_else(|| spec.name().to_string());
            match seen.get(&scope) {
                Some(&(first, l, w)) if (l, w) != (*limit, *window) => {
                    return Err(ConfigError::ConflictingThrottle {
                        scope,
                        first: first.to_string(),
                        second: spec.name().to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(scope, (spec.name(), *limit, *window));
                }
            }
        }
    }
    Ok(())
}

fn compile(
    spec: &PolicySpec,
    destinations: Option<&Arc<DestinationCheck>>,
    signatures: Option<&Arc<SignatureCheck>>,
    limiter: &Arc<RateLimiter>,
) -> Result<CompiledPolicy, ConfigError> {
    if spec.requirements().is_empty() {
        return Err(ConfigError::EmptyPolicy(spec.name().to_string()));
    }

    let missing = |check: CheckKind, missing: &'static str| ConfigError::MissingDependency {
        policy: spec.name().to_string(),
        check,
        missing,
    };

    let mut checks: Vec<Arc<dyn Check>> = Vec::with_capacity(spec.requirements().len());
    for req in spec.requirements() {
        let check: Arc<dyn Check> = match req {
            PolicyReq::Ownership => Arc::new(OwnershipCheck),
            PolicyReq::StrongCredential => Arc::new(CredentialCheck),
            PolicyReq::AllowedDestination => {
                let check = destinations
                    .ok_or_else(|| missing(CheckKind::Destination, "a destination allowlist"))?;
                Arc::clone(check) as Arc<dyn Check>
            }
            PolicyReq::SignedPayload => {
                let check = signatures
                    .ok_or_else(|| missing(CheckKind::Signature, "a signature public key"))?;
                Arc::clone(check) as Arc<dyn Check>
            }
            PolicyReq::Throttle {
                limit,
                window,
                scope,
            } => {
                let scope = scope.clone().unwrap_or_else(|| spec.name().to_string());
                let rule = ThrottleRule::new(scope, *limit, *window);
                rule.validate(spec.name())?;
                Arc::new(ThrottleCheck::new(Arc::clone(limiter), rule))
            }
        };
        checks.push(check);
    }
    Ok(CompiledPolicy { checks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditOutcome, AuditTrail};
    use crate::clock::ManualClock;
    use crate::policy::{AllowedDestination, Ownership, StrongCredential, Throttle};
    use crate::request::{Principal, ResourceRef};
    use crate::resolve::StaticResolver;
    use std::net::{IpAddr, Ipv4Addr};

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))
    }

    #[test]
    fn unknown_policy_is_malformed_input() {
        let guard = PolicyGuard::builder()
            .policy(PolicySpec::new("read").require(Ownership))
            .build()
            .unwrap();
        let ctx = RequestContext::builder("req-1", source()).build();
        let verdict = guard.evaluate("delete_everything", &ctx);
        assert_eq!(verdict.reason(), Some(DenyReason::MalformedInput));
    }

    #[test]
    fn empty_policy_is_rejected_at_build() {
        let err = PolicyGuard::builder()
            .policy(PolicySpec::new("noop"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::EmptyPolicy(name)) if name == "noop"));
    }

    #[test]
    fn duplicate_policy_is_rejected_at_build() {
        let err = PolicyGuard::builder()
            .policy(PolicySpec::new("read").require(Ownership))
            .policy(PolicySpec::new("read").require(StrongCredential))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::DuplicatePolicy(_))));
    }

    #[test]
    fn destination_without_allowlist_is_rejected_at_build() {
        let err = PolicyGuard::builder()
            .policy(PolicySpec::new("fetch").require(AllowedDestination))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingDependency {
                check: CheckKind::Destination,
                ..
            })
        ));
    }

    #[test]
    fn zero_throttle_limit_is_rejected_at_build() {
        let err = PolicyGuard::builder()
            .policy(PolicySpec::new("login").require(Throttle::new(0, Duration::from_secs(20))))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidThrottle { field: "limit", .. })
        ));
    }

    #[test]
    fn first_failing_check_short_circuits() {
        let clock = Arc::new(ManualClock::new());
        let guard = PolicyGuard::builder()
            .clock(clock)
            .policy(
                PolicySpec::new("change_password")
                    .require(Ownership)
                    .require(Throttle::new(1, Duration::from_secs(60))),
            )
            .build()
            .unwrap();

        // Denied by ownership, so the throttle never counts this request
        let anon = RequestContext::builder("req-1", source()).build();
        let denied = guard.evaluate("change_password", &anon);
        assert_eq!(denied.denial().and_then(Denial::check), Some(CheckKind::Ownership));
        assert!(guard.limiter().is_empty());

        let owner = RequestContext::builder("req-2", source())
            .actor(Principal::user("u1", "Una"))
            .target(ResourceRef::new("u1", "u1"))
            .build();
        assert!(guard.evaluate("change_password", &owner).is_allowed());
        let limited = guard.evaluate("change_password", &owner);
        assert_eq!(limited.reason(), Some(DenyReason::RateLimited));
        assert_eq!(limited.denial().and_then(Denial::check), Some(CheckKind::Throttle));
    }

    #[test]
    fn throttle_scope_defaults_to_policy_name() {
        let guard = PolicyGuard::builder()
            .clock(Arc::new(ManualClock::new()))
            .policy(PolicySpec::new("login").require(Throttle::new(1, Duration::from_secs(60))))
            .policy(PolicySpec::new("reset").require(Throttle::new(1, Duration::from_secs(60))))
            .build()
            .unwrap();
        let ctx = RequestContext::builder("req", source()).build();

        assert!(guard.evaluate("login", &ctx).is_allowed());
        assert!(guard.evaluate("reset", &ctx).is_allowed());
        assert!(!guard.evaluate("login", &ctx).is_allowed());
        assert_eq!(guard.limiter().len(), 2);
    }

    #[test]
    fn every_evaluation_is_audited() {
        let trail = Arc::new(AuditTrail::new());
        let guard = PolicyGuard::builder()
            .audit_sink(trail.clone())
            .allow_list(AllowList::new(["cdn.example.com"]).unwrap())
            .resolver(Arc::new(
                StaticResolver::new().with_host("cdn.example.com", [IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]),
            ))
            .policy(PolicySpec::new("fetch").require(AllowedDestination))
            .build()
            .unwrap();

        let ok = RequestContext::builder("req-ok", source())
            .url("https://cdn.example.com/a.png")
            .build();
        let bad = RequestContext::builder("req-bad", source())
            .url("http://cdn.example.com/a.png")
            .build();
        assert!(guard.evaluate("fetch", &ok).is_allowed());
        assert!(!guard.evaluate("fetch", &bad).is_allowed());

        let events = trail.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome(), AuditOutcome::Allowed);
        assert_eq!(events[1].reason(), Some(DenyReason::ForbiddenDestination));
        assert_eq!(events[1].check(), Some(CheckKind::Destination));
    }

    #[test]
    fn admit_archive_requires_signature_check() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PolicyGuard::builder()
            .extractor(SafeExtractor::new(dir.path().join("out")))
            .policy(PolicySpec::new("upload").require(Ownership))
            .build()
            .unwrap();
        let ctx = RequestContext::builder("req", source())
            .actor(Principal::admin("root", "Root"))
            .target(ResourceRef::new("pkg", "root"))
            .bytes(params::PAYLOAD, vec![0_u8; 1024])
            .build();

        let denial = guard.admit_archive("upload", &ctx).unwrap_err();
        assert_eq!(denial.reason(), DenyReason::MalformedInput);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn policy_names_are_sorted() {
        let guard = PolicyGuard::builder()
            .policy(PolicySpec::new("write").require(Ownership))
            .policy(PolicySpec::new("signup").require(StrongCredential))
            .build()
            .unwrap();
        assert_eq!(guard.policy_names(), vec!["signup", "write"]);
        assert!(guard.has_policy("signup"));
        assert!(!guard.has_policy("read"));
    }

    #[test]
    fn conflicting_rules_on_one_scope_are_rejected() {
        let err = PolicyGuard::builder()
            .policy(
                PolicySpec::new("strict")
                    .require(Throttle::new(2, Duration::from_secs(3600)).scoped("auth")),
            )
            .policy(
                PolicySpec::new("lenient")
                    .require(Throttle::new(100, Duration::from_secs(1)).scoped("auth")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ConflictingThrottle { ref scope, ref first, ref second })
                if scope == "auth" && first == "strict" && second == "lenient"
        ));
    }

    #[test]
    fn default_scope_colliding_with_explicit_scope_is_rejected() {
        let err = PolicyGuard::builder()
            .policy(PolicySpec::new("login").require(Throttle::new(5, Duration::from_secs(20))))
            .policy(
                PolicySpec::new("sso")
                    .require(Throttle::new(50, Duration::from_secs(20)).scoped("login")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ConflictingThrottle { .. })));
    }

    #[test]
    fn identical_rules_may_share_a_scope() {
        let clock = Arc::new(ManualClock::new());
        let rule = Throttle::new(2, Duration::from_secs(60)).scoped("auth");
        let guard = PolicyGuard::builder()
            .clock(clock)
            .policy(PolicySpec::new("login").require(rule.clone()))
            .policy(PolicySpec::new("reset").require(rule))
            .build()
            .unwrap();
        let ctx = RequestContext::builder("req", source()).build();

        assert!(guard.evaluate("login", &ctx).is_allowed());
        assert!(guard.evaluate("reset", &ctx).is_allowed());
        assert_eq!(guard.evaluate("login", &ctx).reason(), Some(DenyReason::RateLimited));
    }
}
