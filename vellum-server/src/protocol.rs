//! Wire framing: `[4-byte little-endian length][UTF-8 JSON payload]`.
//! Grounded on `onepointking-minisql::protocol::packet::PacketIO`'s
//! length-prefixed read/write pair, generalized from a 3-byte MySQL header
//! to a 4-byte length and from a fixed binary layout to a JSON payload.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted frame size. A request larger than this is almost
/// certainly a client bug or a malicious peer, not a legitimate document.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Reads one framed JSON value. Returns `Ok(None)` on a clean EOF at a
/// frame boundary (the client closed the connection between requests).
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Option<Value>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    let value: Value = serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, value: &Value) -> std::io::Result<()> {
    let payload = serde_json::to_vec(value)?;
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!({"cmd": "ping"})).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let value = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(value, json!({"cmd": "ping"}));
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
