//! Parsing and rendering of the `ip:port` addresses carried in the tunnel
//! header and the control API.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("address {0:?} must contain exactly one ':'")]
    ColonCount(String),
    #[error("{0:?} is not a valid IPv4 literal")]
    BadHost(String),
    #[error("{0:?} is not a valid port number")]
    BadPort(String),
    #[error("port {0} is out of range 1..=65535")]
    PortOutOfRange(i64),
}

/// Parses `"a.b.c.d:port"`. Fails on anything other than exactly one colon,
/// a non-IPv4 host, a non-numeric port, or a port outside `1..=65535`.
pub fn parse(s: &str) -> Result<SocketAddrV4, Error> {
    let mut parts = s.splitn(3, ':');

    let host = parts.next().filter(|s| !s.is_empty());
    let port_str = parts.next().filter(|s| !s.is_empty());
    let extra = parts.next();

    let (host, port_str) = match (host, port_str, extra) {
        (Some(h), Some(p), None) => (h, p),
        _ => return Err(Error::ColonCount(s.to_string())),
    };

    let ip = Ipv4Addr::from_str(host).map_err(|_| Error::BadHost(host.to_string()))?;

    let port: i64 = port_str
        .parse()
        .map_err(|_| Error::BadPort(port_str.to_string()))?;

    if !(1..=65535).contains(&port) {
        return Err(Error::PortOutOfRange(port));
    }

    Ok(SocketAddrV4::new(ip, port as u16))
}

/// Renders as `a.b.c.d:port`, the inverse of [`parse`].
pub fn render(addr: &SocketAddrV4) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}
