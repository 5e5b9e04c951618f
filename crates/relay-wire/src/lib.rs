// SPDX-License-Identifier: Apache-2.0

//! Wire framing (spec §3, "Connection frame (wire format)" and §4.3,
//! "Framer").
//!
//! ```text
//!  offset  size  field
//!    0      2    message-id      (network byte order, unsigned)
//!    2      8    body-length     (network byte order, unsigned)
//!   10      N    body bytes
//! ```
//!
//! This crate is deliberately session-agnostic: it knows how to read and
//! write frames against any `tokio` `AsyncRead`/`AsyncWrite`, but has no
//! notion of a `Session` or a message queue. [`relay_session`] builds the
//! per-connection reader/writer tasks on top of [`read_frame`] and
//! [`encode_frame`].

pub mod error;

pub use error::FramingError;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of the fixed frame header.
pub const HEADER_LEN: usize = 10;

/// Default cap on body length (1 MiB), spec §4.3 step 3.
pub const DEFAULT_MAX_BODY: u64 = 1024 * 1024;

/// One decoded frame read off the wire: an id, its declared body length,
/// and the body itself. Carries no session reference — that's layered on
/// by [`relay_session`]'s `DecodedMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Message-id from the header.
    pub id: u16,
    /// Body length from the header (equals `payload.len()`).
    pub length: u64,
    /// Owned body bytes, exactly `length` long.
    pub payload: Vec<u8>,
}

/// Parses a 10-byte header into `(id, length)`. Does not validate bounds;
/// callers apply `max_body` themselves (see [`read_frame`]).
#[must_use]
pub fn decode_header(header: &[u8; HEADER_LEN]) -> (u16, u64) {
    let id = u16::from_be_bytes([header[0], header[1]]);
    let length = u64::from_be_bytes([
        header[2], header[3], header[4], header[5], header[6], header[7], header[8], header[9],
    ]);
    (id, length)
}

/// Encodes `(id, length)` into a 10-byte header in network byte order.
#[must_use]
pub fn encode_header(id: u16, length: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..2].copy_from_slice(&id.to_be_bytes());
    header[2..10].copy_from_slice(&length.to_be_bytes());
    header
}

/// Encodes a complete frame (header + body) ready to write to the wire.
/// Used by the session writer to build the buffer queued by `Session::send`
/// (spec §3, "Outbound message").
#[must_use]
pub fn encode_frame(id: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&encode_header(id, body.len() as u64));
    buf.extend_from_slice(body);
    buf
}

/// Reads exactly one frame from `reader`, enforcing `0 < length <= max_body`
/// (spec §4.3 steps 1-4).
///
/// Retries internally on short reads (tokio's `read_exact` already loops
/// until the buffer is full or an error/EOF occurs); the only "retry at
/// this layer" the spec allows is exactly that - no retry across frames
/// or across errors.
pub async fn read_frame<R>(reader: &mut R, max_body: u64) -> Result<RawFrame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_classified(reader, &mut header, FrameStage::Header).await?;
    let (id, length) = decode_header(&header);
    if length == 0 || length > max_body {
        return Err(FramingError::InvalidLength { length, max_body });
    }
    let mut payload = vec![0u8; length as usize];
    read_exact_classified(reader, &mut payload, FrameStage::Body).await?;
    Ok(RawFrame {
        id,
        length,
        payload,
    })
}

/// Writes a complete frame in one logical write (spec §4.4, writer
/// contract: "one atomic write of exactly `length + 10` bytes").
pub async fn write_frame<W>(writer: &mut W, id: u16, body: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let framed = encode_frame(id, body);
    writer
        .write_all(&framed)
        .await
        .map_err(FramingError::from_io)?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum FrameStage {
    Header,
    Body,
}

async fn read_exact_classified<R>(
    reader: &mut R,
    buf: &mut [u8],
    stage: FrameStage,
) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => match stage {
            FrameStage::Header => Err(FramingError::EofBeforeHeader),
            FrameStage::Body => Err(FramingError::EofBeforeBody),
        },
        Err(err) => Err(FramingError::from_io(err)),
    }
}
