//! A single `(Header, Payload)` unit on the tunnel.

use std::net::SocketAddrV4;

use crate::header::Header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Builds a segment from its endpoints and payload; `payload.len()` must
    /// fit in a `u32`, which every caller in this workspace guarantees by
    /// reading in bounded chunks (see `dialer`/`exposure` read buffers).
    pub fn new(user: SocketAddrV4, service: SocketAddrV4, payload: Vec<u8>) -> Self {
        let payload_len = payload.len() as u32;
        Self {
            header: Header::new(user, service, payload_len),
            payload,
        }
    }
}
