//! Host-to-address resolution for the destination check.
//!
//! The destination check never trusts a hostname on its own: it resolves the
//! host and vets every returned address. Resolution is abstracted behind
//! [`Resolver`] so tests can simulate rebinding without touching DNS.

use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Why a host could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The name does not exist or has no addresses
    #[error("host has no addresses")]
    NotFound,
    /// The lookup did not finish within the timeout
    #[error("resolution timed out after {0:?}")]
    TimedOut(Duration),
    /// The lookup failed for another reason
    #[error("resolution failed: {0}")]
    Failed(String),
}

/// Address resolution facility.
pub trait Resolver: Send + Sync {
    /// Resolves `host` to the addresses a connection to `port` would use.
    ///
    /// Implementations must give up after `timeout`.
    fn resolve(&self, host: &str, port: u16, timeout: Duration) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the operating system's lookup on a helper thread.
///
/// The lookup thread is detached when the timeout expires; its result is
/// discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16, timeout: Duration) -> Result<Vec<IpAddr>, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let (tx, rx) = mpsc::channel();
        let name = host.to_string();
        thread::Builder::new()
            .name("policy-guard-resolve".to_string())
            .spawn(move || {
                let result = (name.as_str(), port)
                    .to_socket_addrs()
                    .map(|addrs| addrs.map(|addr| addr.ip()).collect::<Vec<_>>())
                    .map_err(|err| ResolveError::Failed(err.to_string()));
                // Receiver may have timed out already.
                let _ = tx.send(result);
            })
            .map_err(|err| ResolveError::Failed(err.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(ips)) if ips.is_empty() => Err(ResolveError::NotFound),
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ResolveError::TimedOut(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ResolveError::Failed("resolver thread exited".to_string()))
            }
        }
    }
}

/// A fixed host table.
///
/// IP literals resolve to themselves; unknown names are [`ResolveError::NotFound`].
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use std::time::Duration;
/// use policy_guard::{Resolver, StaticResolver};
///
/// let resolver = StaticResolver::new()
///     .with_host("example.com", [IpAddr::V4(Ipv4Addr::new(93, 184, 215, 14))]);
/// let ips = resolver.resolve("example.com", 443, Duration::from_millis(50)).unwrap();
/// assert_eq!(ips.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `host` to `ips`, replacing any earlier entry.
    pub fn with_host(mut self, host: &str, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.hosts
            .insert(host.to_ascii_lowercase(), ips.into_iter().collect());
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, _port: u16, _timeout: Duration) -> Result<Vec<IpAddr>, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        match self.hosts.get(&host.to_ascii_lowercase()) {
            Some(ips) if !ips.is_empty() => Ok(ips.clone()),
            _ => Err(ResolveError::NotFound),
        }
    }
}
