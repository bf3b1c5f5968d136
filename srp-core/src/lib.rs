//! Data plane for `srp`: an outbound-initiated TCP reverse proxy.
//!
//! An agent running inside a private network dials out to a public server
//! and keeps one multiplexed tunnel open. The server accepts user TCP
//! connections on per-service public ports and forwards their bytes over
//! that tunnel, tagged with the originating user address so the agent can
//! demultiplex them back onto per-flow connections to the intranet service.

pub mod address;
pub mod agent;
pub mod handshake;
pub mod header;
pub mod registry;
pub mod segment;
pub mod server;
pub mod transport;
