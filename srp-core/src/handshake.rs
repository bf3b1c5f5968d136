//! The out-of-band handshake that precedes framed transport on a tunnel
//! socket: one unframed JSON write each way, then both sides switch to
//! [`crate::transport`] on the same socket.
//!
//! Reading "up to 1 KiB in one read" and assuming a complete JSON object
//! arrived atomically is a known wart inherited from the original design: it
//! works because both peers write their message in a single `write_all`
//! call and TCP rarely fragments a sub-1KiB write, but a determined attacker
//! or an unlucky MTU could split it. A re-implementation that wants to close
//! this gap should prefix the handshake with a length or a terminator.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HANDSHAKE_READ_LIMIT: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    #[serde(rename = "Succeeded")]
    pub succeeded: bool,
    #[serde(rename = "Message")]
    pub message: String,
}

impl HandshakeResponse {
    pub fn ok() -> Self {
        Self {
            succeeded: true,
            message: String::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("handshake connection closed before a message arrived")]
    ConnectionClosed,
    #[error("I/O error during handshake")]
    Io(#[source] std::io::Error),
    #[error("malformed handshake message")]
    Malformed(#[source] serde_json::Error),
}

pub async fn write_message<W, T>(stream: &mut W, message: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message).map_err(Error::Malformed)?;
    stream.write_all(&bytes).await.map_err(Error::Io)
}

/// A single read, no framing: the caller gets whatever arrived in one
/// syscall and it must already be a complete JSON object.
pub async fn read_message<R, T>(stream: &mut R) -> Result<T, Error>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut buf = vec![0u8; HANDSHAKE_READ_LIMIT];
    let n = stream.read(&mut buf).await.map_err(Error::Io)?;
    if n == 0 {
        return Err(Error::ConnectionClosed);
    }
    serde_json::from_slice(&buf[..n]).map_err(Error::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn registration_round_trip() {
        let (mut client, mut server) = duplex(1024);

        let sent = AgentRegistration {
            id: "agent-1".into(),
            description: "a test agent".into(),
        };

        write_message(&mut client, &sent).await.unwrap();
        let received: AgentRegistration = read_message(&mut server).await.unwrap();

        assert_eq!(sent, received);
    }

    #[tokio::test]
    async fn response_uses_capitalized_wire_keys() {
        let bytes = serde_json::to_vec(&HandshakeResponse::ok()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Succeeded\""));
        assert!(text.contains("\"Message\""));
    }
}
