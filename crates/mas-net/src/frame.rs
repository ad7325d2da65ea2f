//! Wire format: three length-prefixed frames per message.
//!
//! Layout on the stream, repeated per message:
//!
//! ```text
//! [u32 BE len][destination bytes][u32 BE len][source bytes][u32 BE len][body bytes]
//! ```
//!
//! Destination and source are UTF-8 element names; the body frame is the
//! JSON-encoded [`Message`](mas_core::Message) envelope.  Carrying the
//! destination in its own frame lets subscribe sockets filter without
//! parsing JSON.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{NetError, NetResult};

/// Upper bound on a single frame.  A bid ledger for a large scenario is tens
/// of kilobytes; anything beyond this cap indicates a corrupted stream.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One message as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frames {
    pub dst: String,
    pub src: String,
    pub body: Bytes,
}

impl Frames {
    /// Encode an envelope into its wire frames.
    pub fn from_message(msg: &mas_core::Message) -> NetResult<Self> {
        Ok(Self {
            dst: msg.dst.clone(),
            src: msg.src.clone(),
            body: Bytes::from(msg.to_json()?.into_bytes()),
        })
    }

    /// Decode the body frame back into an envelope.
    pub fn into_message(self) -> NetResult<mas_core::Message> {
        let raw = std::str::from_utf8(&self.body).map_err(|e| {
            NetError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(mas_core::Message::from_json(raw)?)
    }
}

/// Write one message's three frames.  Flushes after the last frame.
pub async fn write_frames<W: AsyncWrite + Unpin>(w: &mut W, frames: &Frames) -> NetResult<()> {
    write_frame(w, frames.dst.as_bytes()).await?;
    write_frame(w, frames.src.as_bytes()).await?;
    write_frame(w, &frames.body).await?;
    w.flush().await?;
    Ok(())
}

/// Read one message's three frames.
///
/// An EOF *before the first byte* of the destination frame reports
/// `UnexpectedEof` like any mid-frame EOF; callers treat either as the peer
/// going away.
pub async fn read_frames<R: AsyncRead + Unpin>(r: &mut R) -> NetResult<Frames> {
    let dst = read_frame(r).await?;
    let src = read_frame(r).await?;
    let body = read_frame(r).await?;
    Ok(Frames {
        dst: String::from_utf8_lossy(&dst).into_owned(),
        src: String::from_utf8_lossy(&src).into_owned(),
        body: Bytes::from(body),
    })
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> NetResult<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge { got: payload.len(), cap: MAX_FRAME_BYTES });
    }
    w.write_u32(payload.len() as u32).await?;
    w.write_all(payload).await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> NetResult<Vec<u8>> {
    let len = r.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge { got: len, cap: MAX_FRAME_BYTES });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}
