use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use crate::{Secret, Tainted};

/// Well-known parameter names read by the built-in checks.
pub mod params {
    /// Candidate password for the credential-strength check.
    pub const PASSWORD: &str = "password";
    /// Destination URL for the allowlist check.
    pub const URL: &str = "url";
    /// Archive payload for the signature check.
    pub const PAYLOAD: &str = "payload";
    /// Detached signature over the payload digest.
    pub const SIGNATURE: &str = "signature";
}

/// Parameter-name fragments whose values are never rendered.
const FILTERED_FRAGMENTS: &[&str] = &[
    "passw",
    "secret",
    "token",
    "_key",
    "crypt",
    "salt",
    "certificate",
    "otp",
    "ssn",
];

/// Returns true when a parameter name looks like it carries credentials.
///
/// Matching is case-insensitive and by substring, so `api_key`,
/// `new_password`, and `reset_token` are all filtered.
pub fn is_filtered_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    FILTERED_FRAGMENTS.iter().any(|frag| lower.contains(frag))
}

/// Roles the guard interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Regular account
    User,
    /// Elevated role that bypasses ownership checks
    Admin,
}

/// An authenticated user or service principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Unique identifier for this principal
    pub id: String,
    /// Display name
    pub name: String,
    /// Granted roles
    pub roles: BTreeSet<Role>,
}

impl Principal {
    /// Creates a principal with the `User` role.
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: BTreeSet::from([Role::User]),
        }
    }

    /// Creates a principal holding the `Admin` role.
    pub fn admin(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::user(id, name).with_role(Role::Admin)
    }

    /// Adds a role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    /// Returns true if the principal holds `role`.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Returns true if the principal holds the `Admin` role.
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

/// Declared intent of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read a resource
    Read,
    /// Create or modify a resource
    Write,
    /// Administrative operation
    Admin,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
            Action::Admin => write!(f, "admin"),
        }
    }
}

/// The resource a request targets, with its owning principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Resource identifier (e.g. `user-42`, `order-17`)
    pub id: String,
    /// Identifier of the owning principal
    pub owner_id: String,
}

impl ResourceRef {
    /// Creates a resource reference.
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// A policy-specific input value.
#[derive(Clone)]
pub enum ParamValue {
    /// Untrusted text (URLs, base64 signatures)
    Text(Tainted<String>),
    /// Untrusted bytes (archive payloads, raw signatures)
    Bytes(Tainted<Vec<u8>>),
    /// Candidate credential
    Secret(std::sync::Arc<Secret<String>>),
}

impl ParamValue {
    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Text(_) => "text",
            ParamValue::Bytes(_) => "bytes",
            ParamValue::Secret(_) => "secret",
        }
    }
}

/// Named parameters attached to a request.
///
/// Debug output lists parameter names and value kinds only. Values never
/// appear, and names matching [`is_filtered_param`] are marked `[FILTERED]`.
#[derive(Clone, Default)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    /// Creates an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter, replacing any previous value under `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Returns the parameter stored under `name`.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no parameters are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(value)) => Some(value.peek().as_str()),
            _ => None,
        }
    }

    pub(crate) fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.values.get(name) {
            Some(ParamValue::Bytes(value)) => Some(value.peek().as_slice()),
            _ => None,
        }
    }

    pub(crate) fn secret(&self, name: &str) -> Option<&Secret<String>> {
        match self.values.get(name) {
            Some(ParamValue::Secret(value)) => Some(value.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.values {
            if is_filtered_param(name) {
                map.entry(name, &format_args!("[FILTERED]"));
            } else {
                map.entry(name, &format_args!("<{}>", value.kind()));
            }
        }
        map.finish()
    }
}

/// Immutable snapshot of one inbound action.
///
/// Built once per request with [`RequestContext::builder`] and only read by
/// the guard.
///
/// # Examples
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use policy_guard::{Action, Principal, RequestContext, ResourceRef};
///
/// let ctx = RequestContext::builder("req-1", IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)))
///     .actor(Principal::user("user-1", "Alice"))
///     .target(ResourceRef::new("profile-1", "user-1"))
///     .action(Action::Read)
///     .build();
///
/// assert_eq!(ctx.request_id(), "req-1");
/// assert_eq!(ctx.actor().map(|p| p.id.as_str()), Some("user-1"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    actor: Option<Principal>,
    source: IpAddr,
    target: Option<ResourceRef>,
    action: Action,
    params: Params,
}

impl RequestContext {
    /// Starts building a context for a request from `source`.
    pub fn builder(request_id: impl Into<String>, source: IpAddr) -> RequestContextBuilder {
        RequestContextBuilder {
            ctx: RequestContext {
                request_id: request_id.into(),
                actor: None,
                source,
                target: None,
                action: Action::Read,
                params: Params::new(),
            },
        }
    }

    /// Returns the request id used for log correlation.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the authenticated actor, if any.
    pub fn actor(&self) -> Option<&Principal> {
        self.actor.as_ref()
    }

    /// Returns the source address of the request.
    pub fn source(&self) -> IpAddr {
        self.source
    }

    /// Returns the targeted resource, if any.
    pub fn target(&self) -> Option<&ResourceRef> {
        self.target.as_ref()
    }

    /// Returns the declared action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Returns the policy-specific parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }
}

/// Builder for [`RequestContext`].
#[derive(Debug)]
pub struct RequestContextBuilder {
    ctx: RequestContext,
}

impl RequestContextBuilder {
    /// Sets the authenticated actor.
    pub fn actor(mut self, principal: Principal) -> Self {
        self.ctx.actor = Some(principal);
        self
    }

    /// Sets the actor from an optional principal.
    pub fn maybe_actor(mut self, principal: Option<Principal>) -> Self {
        self.ctx.actor = principal;
        self
    }

    /// Sets the targeted resource.
    pub fn target(mut self, resource: ResourceRef) -> Self {
        self.ctx.target = Some(resource);
        self
    }

    /// Sets the declared action (defaults to `Read`).
    pub fn action(mut self, action: Action) -> Self {
        self.ctx.action = action;
        self
    }

    /// Attaches an untrusted text parameter.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx
            .params
            .insert(name, ParamValue::Text(Tainted::new(value.into())));
        self
    }

    /// Attaches an untrusted byte parameter.
    pub fn bytes(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.ctx
            .params
            .insert(name, ParamValue::Bytes(Tainted::new(value.into())));
        self
    }

    /// Attaches a secret parameter.
    pub fn secret(mut self, name: impl Into<String>, value: Secret<String>) -> Self {
        self.ctx
            .params
            .insert(name, ParamValue::Secret(std::sync::Arc::new(value)));
        self
    }

    /// Attaches the candidate password read by the credential check.
    pub fn password(self, candidate: impl Into<String>) -> Self {
        self.secret(params::PASSWORD, Secret::new(candidate.into()))
    }

    /// Attaches the destination URL read by the allowlist check.
    pub fn url(self, url: impl Into<String>) -> Self {
        self.text(params::URL, url)
    }

    /// Attaches an archive payload and its base64 detached signature.
    pub fn signed_payload(self, payload: impl Into<Vec<u8>>, signature_b64: impl Into<String>) -> Self {
        self.bytes(params::PAYLOAD, payload)
            .text(params::SIGNATURE, signature_b64)
    }

    /// Finishes the snapshot.
    pub fn build(self) -> RequestContext {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7))
    }

    #[test]
    fn filtered_names_match_rails_style_fragments() {
        assert!(is_filtered_param("password"));
        assert!(is_filtered_param("new_Password_confirmation"));
        assert!(is_filtered_param("api_key"));
        assert!(is_filtered_param("reset_token"));
        assert!(is_filtered_param("otp_code"));
        assert!(!is_filtered_param("url"));
        assert!(!is_filtered_param("payload"));
    }

    #[test]
    fn params_debug_never_shows_values() {
        let ctx = RequestContext::builder("req-9", source())
            .password("Sup3r$ecretValue")
            .url("https://example.com/avatar.png")
            .text("reset_token", "abc123")
            .build();

        let out = format!("{:?}", ctx);
        assert!(!out.contains("Sup3r$ecretValue"));
        assert!(!out.contains("abc123"));
        assert!(!out.contains("avatar.png"));
        assert!(out.contains("[FILTERED]"));
        assert!(out.contains("<text>"));
    }

    #[test]
    fn typed_accessors_respect_value_kind() {
        let ctx = RequestContext::builder("req-2", source())
            .text(params::URL, "https://example.com")
            .bytes(params::PAYLOAD, vec![1, 2, 3])
            .password("pw")
            .build();

        let p = ctx.params();
        assert_eq!(p.text(params::URL), Some("https://example.com"));
        assert_eq!(p.bytes(params::PAYLOAD), Some(&[1_u8, 2, 3][..]));
        assert!(p.secret(params::PASSWORD).is_some());
        assert!(p.text(params::PASSWORD).is_none());
        assert!(p.bytes(params::URL).is_none());
    }

    #[test]
    fn admin_constructor_keeps_user_role() {
        let admin = Principal::admin("root", "Root");
        assert!(admin.is_admin());
        assert!(admin.has_role(Role::User));
        assert!(!Principal::user("u", "U").is_admin());
    }

    #[test]
    fn builder_defaults_to_read_without_actor() {
        let ctx = RequestContext::builder("req-3", source()).build();
        assert_eq!(ctx.action(), Action::Read);
        assert!(ctx.actor().is_none());
        assert!(ctx.target().is_none());
        assert!(ctx.params().is_empty());
    }
}
