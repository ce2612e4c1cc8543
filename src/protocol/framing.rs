use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AdapterError, Result};

/// SSLRequest code: (1234 << 16) | 5679
pub const SSL_REQUEST_CODE: i32 = 80877103;
/// GSSENCRequest code: (1234 << 16) | 5680
pub const GSSENC_REQUEST_CODE: i32 = 80877104;
/// CancelRequest code: (1234 << 16) | 5678
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
/// Protocol version 3.0
pub const PROTOCOL_VERSION_3: i32 = 196608;

/// Upper bound on a startup-phase message, same limit the PostgreSQL server applies.
pub const MAX_STARTUP_MESSAGE_LEN: usize = 10_000;

/// Upper bound on a backend message read by the proxy itself (login phase only;
/// relayed traffic is never framed).
pub const MAX_BACKEND_MESSAGE_LEN: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct BackendMessage {
    pub tag: u8,
    pub payload: Bytes, // payload excludes the 4-byte length field
}

pub async fn read_backend_message<R: AsyncRead + Unpin>(rd: &mut R) -> Result<BackendMessage> {
    let mut hdr = [0u8; 5];
    rd.read_exact(&mut hdr).await?;
    let tag = hdr[0];
    let len = i32::from_be_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]);
    if len < 4 {
        return Err(AdapterError::Protocol(format!(
            "invalid backend message length: {len}"
        )));
    }
    let len = len as usize;
    if len > MAX_BACKEND_MESSAGE_LEN {
        return Err(AdapterError::Protocol(format!(
            "backend message {:?} too long: {len} bytes",
            tag as char
        )));
    }
    let mut buf = vec![0u8; len - 4];
    rd.read_exact(&mut buf).await?;
    Ok(BackendMessage {
        tag,
        payload: Bytes::from(buf),
    })
}

/// Read one untagged startup-phase message and return its body (length prefix stripped).
///
/// End-of-stream surfaces as [`AdapterError::Io`]; a bad length as [`AdapterError::Protocol`].
pub async fn read_startup_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<Bytes> {
    let mut hdr = [0u8; 4];
    rd.read_exact(&mut hdr).await?;
    let len = i32::from_be_bytes(hdr);
    if len < 4 {
        return Err(AdapterError::Protocol(format!(
            "invalid startup message length: {len}"
        )));
    }
    let len = len as usize;
    if len > MAX_STARTUP_MESSAGE_LEN {
        return Err(AdapterError::Protocol(format!(
            "startup message too long: {len} bytes"
        )));
    }
    let mut buf = vec![0u8; len - 4];
    rd.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

pub async fn write_ssl_request<W: AsyncWrite + Unpin>(wr: &mut W) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&(8i32).to_be_bytes());
    buf[4..8].copy_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

pub fn encode_startup_message(protocol_version: i32, params: &[(&str, &str)]) -> BytesMut {
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
    buf
}

pub async fn write_startup_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    protocol_version: i32,
    params: &[(&str, &str)],
) -> Result<()> {
    let buf = encode_startup_message(protocol_version, params);
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

/// PasswordMessage carrying a cleartext password (NUL-terminated).
pub async fn write_password_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    password: &str,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(password.len() + 16);
    buf.put_u8(b'p');
    buf.put_i32(0);
    buf.extend_from_slice(password.as_bytes());
    buf.put_u8(0);

    let len = (buf.len() - 1) as i32;
    buf[1..5].copy_from_slice(&len.to_be_bytes());

    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
