//! The 16-byte per-segment header: two IPv4 endpoints plus a payload length.
//!
//! ```text
//! offset 0..3   user IPv4
//! offset 4..7   service IPv4
//! offset 8..9   user port       (u16 BE)
//! offset 10..11 service port    (u16 BE)
//! offset 12..15 payload length  (u32 BE)
//! ```

use byteorder::{ByteOrder, NetworkEndian};
use std::net::{Ipv4Addr, SocketAddrV4};

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub user: SocketAddrV4,
    pub service: SocketAddrV4,
    pub payload_len: u32,
}

impl Header {
    pub fn new(user: SocketAddrV4, service: SocketAddrV4, payload_len: u32) -> Self {
        Self {
            user,
            service,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.user.ip().octets());
        out[4..8].copy_from_slice(&self.service.ip().octets());
        NetworkEndian::write_u16(&mut out[8..10], self.user.port());
        NetworkEndian::write_u16(&mut out[10..12], self.service.port());
        NetworkEndian::write_u32(&mut out[12..16], self.payload_len);
        out
    }

    /// Total: any 16-byte sequence decodes to some header, valid or not.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        let user_ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let service_ip = Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]);
        let user_port = NetworkEndian::read_u16(&bytes[8..10]);
        let service_port = NetworkEndian::read_u16(&bytes[10..12]);
        let payload_len = NetworkEndian::read_u32(&bytes[12..16]);

        Self {
            user: SocketAddrV4::new(user_ip, user_port),
            service: SocketAddrV4::new(service_ip, service_port),
            payload_len,
        }
    }

    pub fn user(&self) -> String {
        crate::address::render(&self.user)
    }

    pub fn service(&self) -> String {
        crate::address::render(&self.service)
    }
}
