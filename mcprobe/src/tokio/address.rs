//! Name resolution with the shared hickory resolver.

use std::net::SocketAddr;

use crate::{Address, Error, address::split_host_port};

use super::resolver;

/// Resolves a Java address the way the client does: an explicit port is used
/// as is, otherwise a `_minecraft._tcp` SRV record may redirect to another
/// host and port.
///
/// Returns the address that should go in the handshake together with the
/// socket to connect to.
///
/// # Errors
/// [`Error::InvalidAddress`] for malformed input and [`Error::DnsLookupFailed`]
/// when the final host doesn't resolve.
pub async fn resolve_java(input: &str, default_port: u16) -> Result<(Address, SocketAddr), Error> {
    let (host, port) = split_host_port(input)?;
    let address = match port {
        Some(port) => Address::new(host, port),
        None if host.parse::<std::net::IpAddr>().is_ok() => Address::new(host, default_port),
        None => lookup_srv(&host)
            .await
            .unwrap_or_else(|| Address::new(host, default_port)),
    };
    let socket = resolve(&address).await?;
    Ok((address, socket))
}

async fn lookup_srv(host: &str) -> Option<Address> {
    let name = format!("_minecraft._tcp.{host}");
    match resolver().srv_lookup(name.as_str()).await {
        Ok(records) => {
            let record = records.iter().next()?;
            let target = record.target().to_utf8();
            let target = target.trim_end_matches('.');
            debug!(host, target, port = record.port(), "using SRV record");
            Some(Address::new(target, record.port()))
        }
        Err(e) => {
            trace!(host, error = %e, "no SRV record");
            None
        }
    }
}

/// Resolves the host, taking the first address.
///
/// # Errors
/// [`Error::DnsLookupFailed`] if the lookup fails or returns nothing.
pub async fn resolve(address: &Address) -> Result<SocketAddr, Error> {
    if let Some(ip) = address.ip() {
        return Ok(SocketAddr::new(ip, address.port));
    }
    let ips = resolver().lookup_ip(address.host.as_str()).await.map_err(|e| {
        debug!(host = %address.host, error = %e, "lookup failed");
        Error::DnsLookupFailed
    })?;
    let ip = ips.iter().next().ok_or(Error::DnsLookupFailed)?;
    Ok(SocketAddr::new(ip, address.port))
}
