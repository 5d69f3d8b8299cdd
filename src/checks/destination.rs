use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use url::{Host, Url};

use crate::check::Check;
use crate::error::ConfigError;
use crate::request::{params, RequestContext};
use crate::resolve::{ResolveError, Resolver};
use crate::verdict::{CheckKind, Denial, DenyReason, Verdict};

/// The only scheme outbound requests may use.
const ALLOWED_SCHEME: &str = "https";

/// Permitted destination hosts for scheme `https`.
///
/// Hosts are normalized on load: lowercased, trailing dot removed, IPv6
/// brackets stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    hosts: BTreeSet<String>,
}

impl AllowList {
    /// Builds an allowlist, rejecting entries that are not valid hosts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHost`] for an unparsable entry and
    /// [`ConfigError::EmptyAllowList`] when no hosts are given.
    pub fn new<I, S>(hosts: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = BTreeSet::new();
        for raw in hosts {
            let raw = raw.as_ref();
            let label = normalize_host_label(raw);
            let label = match label.parse::<IpAddr>() {
                Ok(ip) => ip.to_string(),
                Err(_) if !label.is_empty() && Host::parse(&label).is_ok() => label,
                Err(_) => return Err(ConfigError::InvalidHost(raw.to_string())),
            };
            normalized.insert(label);
        }
        if normalized.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        Ok(Self { hosts: normalized })
    }

    /// Returns true if the normalized form of `host` is listed.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(&normalize_host_label(host))
    }

    /// Iterates the normalized hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

/// A destination that passed every check, with the addresses vetted for it.
///
/// Connect to [`addrs`](Self::addrs) directly rather than resolving the host
/// again, and call [`DestinationCheck::recheck`] immediately before issuing the
/// request if time has passed since pinning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedDestination {
    url: Url,
    host: String,
    port: u16,
    addrs: Vec<SocketAddr>,
}

impl PinnedDestination {
    /// Returns the parsed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the host used for resolution.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the effective port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the vetted socket addresses.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }
}

/// Outbound URL check guarding against SSRF.
///
/// A URL passes only if all of the following hold:
///
/// 1. it parses, has scheme `https`, and carries no userinfo;
/// 2. its host is on the [`AllowList`] and, if it is an IP literal, that
///    literal is public;
/// 3. the host resolves within the timeout, and every resolved address is
///    public.
///
/// Step 3 is repeated by [`recheck`](Self::recheck) right before the network
/// call, so a name that rebinds to internal space after the first check is
/// still refused.
pub struct DestinationCheck {
    allow: AllowList,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
}

impl std::fmt::Debug for DestinationCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationCheck")
            .field("allow", &self.allow)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DestinationCheck {
    /// Creates the check.
    pub fn new(allow: AllowList, resolver: Arc<dyn Resolver>, timeout: Duration) -> Self {
        Self {
            allow,
            resolver,
            timeout,
        }
    }

    /// Runs every check and returns the destination pinned to its vetted addresses.
    ///
    /// # Errors
    ///
    /// Returns a [`DenyReason::ForbiddenDestination`] denial on any failure.
    pub fn pin(&self, raw: &str) -> Result<PinnedDestination, Denial> {
        let url = Url::parse(raw).map_err(|_| forbidden("url could not be parsed"))?;

        if url.scheme() != ALLOWED_SCHEME {
            return Err(forbidden(format!("scheme '{}' is not allowed", url.scheme())));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(forbidden("url must not embed credentials"));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => normalize_host_label(domain),
            Some(Host::Ipv4(addr)) => screen_literal(IpAddr::V4(addr))?,
            Some(Host::Ipv6(addr)) => screen_literal(IpAddr::V6(addr))?,
            None => return Err(forbidden("url has no host")),
        };
        if !self.allow.contains(&host) {
            return Err(forbidden(format!("host '{host}' is not on the allowlist")));
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| forbidden("url has no port"))?;
        let addrs = self.resolve_public(&host, port)?;

        tracing::debug!(host = %host, port, addrs = addrs.len(), "destination pinned");
        Ok(PinnedDestination {
            url,
            host,
            port,
            addrs,
        })
    }

    /// Re-resolves a pinned destination immediately before use.
    ///
    /// Returns the addresses to connect to. Every freshly resolved address
    /// must be public; otherwise the whole destination is refused.
    ///
    /// # Errors
    ///
    /// Returns a [`DenyReason::ForbiddenDestination`] denial if resolution fails
    /// or any address is internal.
    pub fn recheck(&self, pinned: &PinnedDestination) -> Result<Vec<SocketAddr>, Denial> {
        let addrs = self.resolve_public(&pinned.host, pinned.port)?;
        if addrs != pinned.addrs {
            tracing::debug!(host = %pinned.host, "destination addresses changed since pinning");
        }
        Ok(addrs)
    }

    fn resolve_public(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, Denial> {
        let ips = self
            .resolver
            .resolve(host, port, self.timeout)
            .map_err(|err| match err {
                ResolveError::TimedOut(_) => forbidden("host resolution timed out"),
                ResolveError::NotFound => forbidden("host has no addresses"),
                ResolveError::Failed(_) => forbidden("host resolution failed"),
            })?;
        if ips.is_empty() {
            return Err(forbidden("host has no addresses"));
        }

        let mut addrs: Vec<SocketAddr> = Vec::with_capacity(ips.len());
        for ip in ips {
            if !is_public_address(ip) {
                return Err(forbidden(format!("host resolves to non-public address {ip}")));
            }
            let addr = SocketAddr::new(ip, port);
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        Ok(addrs)
    }
}

impl Check for DestinationCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Destination
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let Some(raw) = ctx.params().text(params::URL) else {
            return Verdict::deny(DenyReason::MalformedInput, "url parameter missing");
        };
        match self.pin(raw) {
            Ok(_) => Verdict::Allow,
            Err(denial) => Verdict::Deny(denial),
        }
    }
}

/// Returns true when `ip` is routable public address space.
///
/// Loopback, private, link-local (including `169.254.169.254`), carrier-grade
/// NAT, unspecified, broadcast, multicast, IPv6 unique-local, and IPv6
/// addresses embedding any of those IPv4 ranges (mapped, IPv4-compatible,
/// NAT64, 6to4) are all non-public.
pub fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => is_public_v4(addr),
        IpAddr::V6(addr) => is_public_v6(addr),
    }
}

fn is_public_v4(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    let this_network = a == 0;
    let shared = a == 100 && (b & 0xc0) == 64;
    !(addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_multicast()
        || addr.is_broadcast()
        || this_network
        || shared)
}

fn is_public_v6(addr: Ipv6Addr) -> bool {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_public_v4(mapped);
    }
    let segments = addr.segments();
    let embedded = |hi: u16, lo: u16| Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));
    // 64:ff9b::/96 NAT64 and deprecated ::a.b.c.d carry IPv4 in the low 32 bits.
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] || segments[..6] == [0; 6] {
        return is_public_v4(embedded(segments[6], segments[7]));
    }
    // 2002::/16 6to4 carries IPv4 right after the prefix.
    if segments[0] == 0x2002 {
        return is_public_v4(embedded(segments[1], segments[2]));
    }
    let unique_local = (segments[0] & 0xfe00) == 0xfc00;
    let link_local = (segments[0] & 0xffc0) == 0xfe80;
    !(addr.is_loopback() || addr.is_unspecified() || addr.is_multicast() || unique_local || link_local)
}

fn screen_literal(ip: IpAddr) -> Result<String, Denial> {
    if is_public_address(ip) {
        Ok(ip.to_string())
    } else {
        Err(forbidden(format!("literal address {ip} is not public")))
    }
}

fn normalize_host_label(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('.');
    let trimmed = trimmed
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

fn forbidden(detail: impl Into<String>) -> Denial {
    Denial::new(DenyReason::ForbiddenDestination, detail)
}
