//! Framed transport: length-prefixed segments over a byte-stream socket.
//!
//! There is no framing-layer checksum or version byte; trust is on the
//! socket. A transport is typically split into a reader and a writer half
//! so the send loop and recv loop of a link or flow can run as independent
//! tasks without serializing through a mutex.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::header::{Header, HEADER_LEN};
use crate::segment::Segment;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport closed")]
    Closed(#[source] std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Closed(err)
    }
}

pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads exactly one segment: 16 header bytes (retrying on short reads
    /// via `read_exact`) then `payload_length` payload bytes. EOF mid-segment
    /// or any I/O error surfaces as [`Error::Closed`]. A zero-length payload
    /// is a valid, complete segment.
    pub async fn receive(&mut self) -> Result<Segment, Error> {
        let mut header_buf = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut header_buf).await?;
        let header = Header::decode(&header_buf);

        let mut payload = vec![0u8; header.payload_len as usize];
        if header.payload_len > 0 {
            self.inner.read_exact(&mut payload).await?;
        }

        Ok(Segment { header, payload })
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes the 16-byte header followed by the payload. The two writes are
    /// coalesced by the caller never yielding between them, so on a single
    /// writer task header and payload land contiguous on the wire even
    /// though the underlying socket sees two `write_all` calls.
    pub async fn send(&mut self, segment: &Segment) -> Result<(), Error> {
        let header = segment.header.encode();
        self.inner.write_all(&header).await?;
        if !segment.payload.is_empty() {
            self.inner.write_all(&segment.payload).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }
}

pub fn split_tcp(stream: TcpStream) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}
