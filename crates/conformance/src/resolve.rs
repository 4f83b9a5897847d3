//! Host name resolution with literal overrides.
//!
//! A `--resolve host:port:addr[,addr]` entry pins the addresses used for one
//! `host:port` pair, bypassing DNS for it. Every other lookup falls through to
//! the wrapped resolver.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::errors::ConfigError;

/// Name resolution errors.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// Invalid hostname provided.
    InvalidHost(String),

    /// No addresses found for the given hostname.
    NoAddressesFound(String),

    /// I/O error during resolution.
    IoError(String),
}

impl std::error::Error for ResolveError {}

impl core::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHost(host) => write!(f, "Invalid hostname: {host}"),
            Self::NoAddressesFound(host) => write!(f, "No addresses found for host: {host}"),
            Self::IoError(err) => write!(f, "I/O error during DNS resolution: {err}"),
        }
    }
}

/// Trait for host name resolution.
///
/// Allows pluggable resolvers so tests can pin addresses.
pub trait Resolver: Send + Sync {
    /// Resolves a hostname and port to socket addresses.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` if resolution fails.
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError>;
}

/// System resolver using `std::net::ToSocketAddrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        if host.is_empty() {
            return Err(ResolveError::InvalidHost(host.to_string()));
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|err| ResolveError::IoError(err.to_string()))?
            .collect();

        if addrs.is_empty() {
            return Err(ResolveError::NoAddressesFound(host.to_string()));
        }

        Ok(addrs)
    }
}

/// One `host:port:addr[,addr]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOverride {
    host: String,
    port: u16,
    addrs: Vec<IpAddr>,
}

impl ResolveOverride {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    /// Host names match case-insensitively, ports exactly.
    #[must_use]
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(strip_brackets(host))
    }

    #[must_use]
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.addrs
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }
}

impl FromStr for ResolveOverride {
    type Err = ConfigError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResolve(entry.to_string());

        // a bracketed IPv6 host keeps its colons inside the brackets
        let (host, rest) = if let Some(stripped) = entry.strip_prefix('[') {
            let (host, rest) = stripped.split_once(']').ok_or_else(invalid)?;
            (host, rest.strip_prefix(':').ok_or_else(invalid)?)
        } else {
            entry.split_once(':').ok_or_else(invalid)?
        };

        let (port, addrs) = rest.split_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        if host.is_empty() || addrs.is_empty() {
            return Err(invalid());
        }

        let addrs = addrs
            .split(',')
            .map(|addr| strip_brackets(addr.trim()).parse::<IpAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
            addrs,
        })
    }
}

/// Resolver that consults the overrides before deferring to `inner`.
#[derive(Debug, Clone)]
pub struct OverrideResolver<R: Resolver> {
    overrides: Vec<ResolveOverride>,
    inner: R,
}

impl<R: Resolver> OverrideResolver<R> {
    pub fn new(overrides: Vec<ResolveOverride>, inner: R) -> Self {
        Self { overrides, inner }
    }
}

impl<R: Resolver> Resolver for OverrideResolver<R> {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        if let Some(entry) = self.overrides.iter().find(|entry| entry.matches(host, port)) {
            ewe_trace::debug!("Resolve override {}:{} -> {:?}", host, port, entry.addrs());
            return Ok(entry.socket_addrs());
        }

        self.inner.resolve(strip_brackets(host), port)
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
}
