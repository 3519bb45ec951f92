//! Request and response framing.
//!
//! Request: identity bytes terminated by a single `0x00`.
//! Response: two blobs, each prefixed with a 4-byte big-endian length.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::result::IssuanceResult;

/// Byte that ends the identity on the wire.
pub const IDENTITY_TERMINATOR: u8 = 0x00;

/// Maximum size of a single response blob (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read an identity up to the first `0x00`.
///
/// Bytes after the terminator are left in the reader. With `max_len` set,
/// at most `max_len` identity bytes are accepted.
pub async fn read_identity<R>(
    reader: &mut R,
    max_len: Option<usize>,
) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    match max_len {
        Some(limit) => {
            let mut limited = AsyncReadExt::take(&mut *reader, (limit as u64).saturating_add(1));
            limited.read_until(IDENTITY_TERMINATOR, &mut buf).await?;
        }
        None => {
            reader.read_until(IDENTITY_TERMINATOR, &mut buf).await?;
        }
    }

    if buf.last() != Some(&IDENTITY_TERMINATOR) {
        return match max_len {
            Some(limit) if buf.len() > limit => Err(ProtocolError::IdentityTooLong { limit }),
            _ => Err(ProtocolError::MissingTerminator { received: buf.len() }),
        };
    }
    buf.pop();

    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidIdentity)
}

/// Write an identity followed by the terminator.
pub async fn write_identity<W>(writer: &mut W, identity: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if identity.as_bytes().contains(&IDENTITY_TERMINATOR) {
        return Err(ProtocolError::InvalidIdentity);
    }

    let mut buf = BytesMut::with_capacity(identity.len() + 1);
    buf.put_slice(identity.as_bytes());
    buf.put_u8(IDENTITY_TERMINATOR);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a response as a single buffer.
pub fn encode_response(result: &IssuanceResult) -> Result<Bytes, ProtocolError> {
    let key = result.key_pem();
    let cert = result.cert_pem();
    check_len("key", key.len())?;
    check_len("certificate", cert.len())?;

    let mut buf = BytesMut::with_capacity(8 + key.len() + cert.len());
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
    buf.put_u32(cert.len() as u32);
    buf.put_slice(cert);
    Ok(buf.freeze())
}

/// Write a complete response and flush it.
///
/// The caller closes the connection afterwards.
pub async fn write_response<W>(writer: &mut W, result: &IssuanceResult) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_response(result)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a complete response.
///
/// # Errors
///
/// Returns `ProtocolError::Truncated` when the peer closes before either
/// length field or blob is complete, including when it sends nothing at all.
pub async fn read_response<R>(reader: &mut R) -> Result<IssuanceResult, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let key = read_blob(reader, "key length", "key").await?;
    let cert = read_blob(reader, "certificate length", "certificate").await?;
    Ok(IssuanceResult::new(key, cert))
}

async fn read_blob<R>(
    reader: &mut R,
    len_field: &'static str,
    field: &'static str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_full(reader, &mut len_buf, len_field).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(field, len)?;

    let mut blob = vec![0u8; len];
    read_full(reader, &mut blob, field).await?;
    Ok(blob)
}

/// Like `read_exact`, but reports how much arrived before EOF.
async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                field,
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

fn check_len(field: &'static str, len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { field, len });
    }
    Ok(())
}
