//! Server address parsing, mirroring the client's "server address" field.

use std::{
    fmt,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
};

use crate::Error;

/// A host (name or IP literal) and a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Splits `host[:port]`, `[v6]:port` or a bare IPv6 literal.
pub(crate) fn split_host_port(input: &str) -> Result<(String, Option<u16>), Error> {
    let input = input.trim();
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or(Error::InvalidAddress)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or(Error::InvalidAddress)?)),
        }
    } else if input.matches(':').count() > 1 {
        (input, None)
    } else {
        match input.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        }
    };

    if host.is_empty() {
        return Err(Error::InvalidAddress);
    }
    let port = port
        .map(|p| p.parse::<u16>().map_err(|_| Error::InvalidAddress))
        .transpose()?;
    Ok((host.to_owned(), port))
}

impl Address {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses an address like `example.com`, `example.com:25566` or `[::1]:19132`.
    ///
    /// # Errors
    /// [`Error::InvalidAddress`] if there is no host or the port isn't a `u16`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, Error> {
        let (host, port) = split_host_port(input)?;
        Ok(Self::new(host, port.unwrap_or(default_port)))
    }

    /// The host as an IP address, if it is a literal.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Resolves the host with the system resolver, taking the first result.
    ///
    /// # Errors
    /// [`Error::DnsLookupFailed`] if the name doesn't resolve.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        if let Some(ip) = self.ip() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                debug!(host = %self.host, error = %e, "lookup failed");
                Error::DnsLookupFailed
            })?
            .next()
            .ok_or(Error::DnsLookupFailed)
    }
}
