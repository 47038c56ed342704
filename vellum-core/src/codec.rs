//! Log record types and their on-disk framing.
//!
//! Frame layout: `[4B length][1B type][payload][4B CRC32C]`. `length`
//! covers `type + payload + crc`. When encryption is enabled the payload
//! is wrapped as an AEAD envelope (`crate::crypto`) in place of the CRC;
//! `length` then covers the envelope.

use crate::crypto::EncryptionKey;
use crate::document::Id;
use crate::error::{CResult, Error};
use crate::index::IndexDef;
use crate::value::Value;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Insert { id: Id, doc: Value, version: u64 },
    Update { id: Id, doc: Value, version: u64 },
    Delete { id: Id, version: u64 },
    IndexCreate { def: IndexDef },
    IndexDrop { name: String },
    CollectionCreate { name: String },
    CollectionDrop { name: String },
    Checkpoint { marker: String },
}

impl LogRecord {
    fn type_tag(&self) -> u8 {
        match self {
            LogRecord::Insert { .. } => 1,
            LogRecord::Update { .. } => 2,
            LogRecord::Delete { .. } => 3,
            LogRecord::IndexCreate { .. } => 4,
            LogRecord::IndexDrop { .. } => 5,
            LogRecord::CollectionCreate { .. } => 6,
            LogRecord::CollectionDrop { .. } => 7,
            LogRecord::Checkpoint { .. } => 8,
        }
    }
}

/// Serializes a record's payload (everything after the type byte and
/// before the trailer) as JSON. `Value` is an untagged enum, which rules
/// out bincode (its deserializer can't self-describe the disk format);
/// JSON costs a little space but keeps decode total and simple.
fn encode_payload(record: &LogRecord) -> CResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| Error::Internal(format!("encode record: {e}")))
}

fn decode_payload(bytes: &[u8]) -> CResult<LogRecord> {
    serde_json::from_slice(bytes).map_err(|e| Error::Corrupt(format!("decode record: {e}")))
}

/// Encodes a full frame ready to append to the log, optionally AEAD-sealed.
pub fn encode_frame(record: &LogRecord, key: Option<&EncryptionKey>) -> CResult<Vec<u8>> {
    let tag = record.type_tag();
    let payload = encode_payload(record)?;

    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(tag);
    body.extend_from_slice(&payload);

    let trailer: Vec<u8> = match key {
        None => {
            let crc = crc32fast::hash(&body);
            let mut out = body;
            out.write_u32::<BigEndian>(crc).unwrap();
            out
        }
        Some(key) => key.encrypt(&body)?,
    };

    let mut frame = Vec::with_capacity(4 + trailer.len());
    frame.write_u32::<BigEndian>(trailer.len() as u32).unwrap();
    frame.extend_from_slice(&trailer);
    Ok(frame)
}

/// Reads one frame's length-prefixed body from `r`, verifies its
/// integrity, and decodes the record. Returns `Ok(None)` on clean EOF
/// (no bytes read at all); any partial frame is a `Corrupt` error so the
/// caller can truncate the tail (see `storage::log::Log::open`).
pub fn decode_frame<R: Read>(r: &mut R, key: Option<&EncryptionKey>) -> CResult<Option<LogRecord>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut trailer = vec![0u8; len];
    r.read_exact(&mut trailer)
        .map_err(|e| Error::Corrupt(format!("truncated frame: {e}")))?;

    let body = match key {
        None => {
            if trailer.len() < 4 {
                return Err(Error::Corrupt("frame shorter than checksum".into()));
            }
            let (body, crc_bytes) = trailer.split_at(trailer.len() - 4);
            let mut crc_reader = crc_bytes;
            let expected = crc_reader.read_u32::<BigEndian>().unwrap();
            let actual = crc32fast::hash(body);
            if actual != expected {
                return Err(Error::Corrupt("checksum mismatch".into()));
            }
            body.to_vec()
        }
        Some(key) => key.decrypt(&trailer)?,
    };

    if body.is_empty() {
        return Err(Error::Corrupt("empty frame body".into()));
    }
    let record = decode_payload(&body[1..])?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Id;

    #[test]
    fn roundtrip_unencrypted() {
        let rec = LogRecord::Insert { id: Id::new(), doc: Value::Int(1), version: 1 };
        let frame = encode_frame(&rec, None).unwrap();
        let mut cursor = std::io::Cursor::new(frame);
        let decoded = decode_frame(&mut cursor, None).unwrap().unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn roundtrip_encrypted() {
        let key = EncryptionKey::from_bytes([3u8; crate::crypto::KEY_LEN]);
        let rec = LogRecord::Delete { id: Id::new(), version: 2 };
        let frame = encode_frame(&rec, Some(&key)).unwrap();
        let mut cursor = std::io::Cursor::new(frame);
        let decoded = decode_frame(&mut cursor, Some(&key)).unwrap().unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let rec = LogRecord::Checkpoint { marker: "m".into() };
        let mut frame = encode_frame(&rec, None).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let mut cursor = std::io::Cursor::new(frame);
        assert!(decode_frame(&mut cursor, None).is_err());
    }

    #[test]
    fn clean_eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(decode_frame(&mut cursor, None).unwrap().is_none());
    }
}
