use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PgNotifyError, Result};

/// Largest backend message accepted; anything bigger is treated as a desync.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

#[derive(Debug, Clone)]
pub struct BackendMessage {
    pub tag: u8,
    pub payload: Bytes, // payload excludes the 4-byte length field
}

fn checked_len(raw: i32) -> Result<usize> {
    let len = raw as usize;
    if raw < 4 || len > MAX_MESSAGE_LEN {
        return Err(PgNotifyError::Protocol(format!(
            "invalid backend message length: {raw}"
        )));
    }
    Ok(len)
}

/// Read exactly one message from an async stream. Used during startup only.
pub async fn read_backend_message<R: AsyncRead + Unpin>(rd: &mut R) -> Result<BackendMessage> {
    let mut hdr = [0u8; 5];
    rd.read_exact(&mut hdr).await?;
    let tag = hdr[0];
    let len = checked_len(i32::from_be_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]))?;
    let mut buf = vec![0u8; len - 4];
    rd.read_exact(&mut buf).await?;
    Ok(BackendMessage {
        tag,
        payload: Bytes::from(buf),
    })
}

/// Split one complete message off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a message; the partial
/// bytes stay in place for the next call.
pub fn try_decode_backend_message(buf: &mut BytesMut) -> Result<Option<BackendMessage>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let len = checked_len(i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]))?;
    if buf.len() < len + 1 {
        buf.reserve(len + 1 - buf.len());
        return Ok(None);
    }
    let mut frame = buf.split_to(len + 1);
    let tag = frame.get_u8();
    frame.advance(4);
    Ok(Some(BackendMessage {
        tag,
        payload: frame.freeze(),
    }))
}

/// Append a tagged frontend message: tag, length placeholder, body, patched length.
fn put_frame(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_at = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - len_at) as i32;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
}

pub fn put_query(buf: &mut BytesMut, sql: &str) {
    put_frame(buf, b'Q', |b| {
        b.extend_from_slice(sql.as_bytes());
        b.put_u8(0);
    });
}

pub fn put_terminate(buf: &mut BytesMut) {
    put_frame(buf, b'X', |_| {});
}

pub async fn write_ssl_request<W: AsyncWrite + Unpin>(wr: &mut W) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&(8i32).to_be_bytes());
    buf[4..8].copy_from_slice(&(80877103i32).to_be_bytes());
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

pub async fn write_startup_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    protocol_version: i32,
    params: &[(&str, &str)],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_i32(0); // length placeholder
    buf.put_i32(protocol_version);

    for (k, v) in params {
        buf.extend_from_slice(k.as_bytes());
        buf.put_u8(0);
        buf.extend_from_slice(v.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0); // terminator

    let len = buf.len() as i32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());

    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

pub async fn write_password_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    payload: &[u8],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(payload.len() + 16);
    put_frame(&mut buf, b'p', |b| b.extend_from_slice(payload));
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
