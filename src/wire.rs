//! Wire schema and the framing used to carry it over TCP.
//!
//! Frames are an 8-byte big-endian length prefix followed by a bincode
//! payload, the same shape as the teacher's `net/session.rs` TCP transport
//! (`stream.read_u64()` / `stream.write_u64(len)` around a raw buffer),
//! generalized here from a fire-and-forget send into one unary
//! request/response round trip per call.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::clock::Timestamp;

pub type PeerId = u32;

const MAX_FRAME_LEN: u64 = 1 << 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub client_id: PeerId,
    pub lamport_timestamp: Timestamp,
    pub request_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessResponse {
    pub access_granted: bool,
    pub lamport_timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRelease {
    pub client_id: PeerId,
    pub lamport_timestamp: Timestamp,
    pub request_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRequest {
    pub client_id: PeerId,
    pub message_content: String,
    pub lamport_timestamp: Timestamp,
    pub request_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintResponse {
    pub success: bool,
    pub confirmation_message: String,
    pub lamport_timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empty;

/// The peer-to-peer and printer RPC surface, tagged so a single TCP
/// connection can multiplex every call a `PeerTransport` makes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    RequestAccess(AccessRequest),
    RequestAccessOk(AccessResponse),
    ReleaseAccess(AccessRelease),
    ReleaseAccessOk(Empty),
    SendToPrinter(PrintRequest),
    SendToPrinterOk(PrintResponse),
}

/// Write one length-prefixed bincode frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    message: &Envelope,
) -> anyhow::Result<()> {
    let buf = bincode::serialize(message)?;
    stream.write_u64(buf.len() as u64).await?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<R: AsyncReadExt + Unpin>(stream: &mut R) -> anyhow::Result<Envelope> {
    let len = stream.read_u64().await?;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "invalid frame length {len}");
    let mut buf = vec![0; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_round_trips() {
        let message = Envelope::RequestAccess(AccessRequest {
            client_id: 7,
            lamport_timestamp: 42,
            request_number: 3,
        });
        let mut buf = Vec::new();
        write_frame(&mut buf, &message).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let got = read_frame(&mut cursor).await.unwrap();
        match got {
            Envelope::RequestAccess(req) => {
                assert_eq!(req.client_id, 7);
                assert_eq!(req.lamport_timestamp, 42);
                assert_eq!(req.request_number, 3);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
