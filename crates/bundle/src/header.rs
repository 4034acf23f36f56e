//! ANS-104 bundle header assembly and parsing: a 32-byte little-endian item count, followed by one
//! (32-byte little-endian size, 32-byte raw id) pair per data item, in the
//! same order the item payloads are concatenated in the bundle body.

use bf_types::DataItemId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const ENTRY_SIZE: usize = 64;
const COUNT_SIZE: usize = 32;
const RAW_ID_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum BundleHeaderError {
    #[error("bundle header truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("bundle header declares {declared} items but only {available} entries fit in {len} bytes")]
    CountMismatch {
        declared: u64,
        available: usize,
        len: usize,
    },
    #[error("invalid data item id in header: {0}")]
    InvalidId(String),
}

impl From<bf_types::InvalidIdError> for BundleHeaderError {
    fn from(e: bf_types::InvalidIdError) -> Self {
        BundleHeaderError::InvalidId(e.to_string())
    }
}

/// One entry in an assembled bundle header: a data item's id and its raw
/// (post-header) byte length within the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeaderEntry {
    pub data_item_id: DataItemId,
    pub byte_count: u64,
}

fn write_u256_le(buf: &mut BytesMut, value: u64) {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&value.to_le_bytes());
    buf.put_slice(&bytes);
}

fn read_u256_le(bytes: &[u8]) -> u64 {
    // The upper 24 bytes are zero for any size this pipeline ever produces;
    // a nonzero high half would overflow u64 and indicates a malformed header.
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(low)
}

fn data_item_id_raw(id: &DataItemId) -> Result<[u8; RAW_ID_LEN], BundleHeaderError> {
    let decoded = data_encoding::BASE64URL_NOPAD
        .decode(id.as_str().as_bytes())
        .map_err(|e| BundleHeaderError::InvalidId(format!("{id}: {e}")))?;
    decoded
        .try_into()
        .map_err(|_: Vec<u8>| BundleHeaderError::InvalidId(format!("{id}: decoded length is not {RAW_ID_LEN} bytes")))
}

/// Assembles an ANS-104 bundle header from its entries, in payload order.
pub fn assemble_bundle_header(entries: &[BundleHeaderEntry]) -> Result<Bytes, BundleHeaderError> {
    let mut buf = BytesMut::with_capacity(COUNT_SIZE + entries.len() * ENTRY_SIZE);
    write_u256_le(&mut buf, entries.len() as u64);
    for entry in entries {
        write_u256_le(&mut buf, entry.byte_count);
        buf.put_slice(&data_item_id_raw(&entry.data_item_id)?);
    }
    Ok(buf.freeze())
}

/// Parses an ANS-104 bundle header, returning its entries in payload order.
pub fn bundle_header_info_from_buffer(buf: &[u8]) -> Result<Vec<BundleHeaderEntry>, BundleHeaderError> {
    if buf.len() < COUNT_SIZE {
        return Err(BundleHeaderError::Truncated {
            expected: COUNT_SIZE,
            actual: buf.len(),
        });
    }
    let mut cursor = buf;
    let count = read_u256_le(&cursor[..COUNT_SIZE]);
    cursor.advance(COUNT_SIZE);

    let available = cursor.len() / ENTRY_SIZE;
    if (available as u64) < count {
        return Err(BundleHeaderError::CountMismatch {
            declared: count,
            available,
            len: buf.len(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let byte_count = read_u256_le(&cursor[..COUNT_SIZE]);
        cursor.advance(COUNT_SIZE);
        let raw_id = &cursor[..RAW_ID_LEN];
        let data_item_id = DataItemId::new(data_encoding::BASE64URL_NOPAD.encode(raw_id))?;
        cursor.advance(RAW_ID_LEN);
        entries.push(BundleHeaderEntry {
            data_item_id,
            byte_count,
        });
    }
    Ok(entries)
}

/// The byte length of a header with `item_count` entries.
pub fn header_byte_count(item_count: usize) -> u64 {
    (COUNT_SIZE + item_count * ENTRY_SIZE) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id(byte: u8) -> DataItemId {
        let raw = [byte; RAW_ID_LEN];
        DataItemId::new(data_encoding::BASE64URL_NOPAD.encode(&raw)).unwrap()
    }

    #[test]
    fn round_trips_through_assemble_and_parse() {
        let entries = vec![
            BundleHeaderEntry {
                data_item_id: sample_id(1),
                byte_count: 100,
            },
            BundleHeaderEntry {
                data_item_id: sample_id(2),
                byte_count: 2048,
            },
        ];
        let header = assemble_bundle_header(&entries).unwrap();
        let parsed = bundle_header_info_from_buffer(&header).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn empty_bundle_has_zero_count() {
        let header = assemble_bundle_header(&[]).unwrap();
        assert_eq!(header.len(), COUNT_SIZE);
        let parsed = bundle_header_info_from_buffer(&header).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = bundle_header_info_from_buffer(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, BundleHeaderError::Truncated { .. }));
    }

    #[test]
    fn declared_count_exceeding_buffer_is_rejected() {
        let mut buf = BytesMut::new();
        write_u256_le(&mut buf, 5);
        // Only one entry's worth of bytes follows, but the header claims 5.
        buf.put_slice(&[0u8; ENTRY_SIZE]);
        let err = bundle_header_info_from_buffer(&buf).unwrap_err();
        assert!(matches!(err, BundleHeaderError::CountMismatch { .. }));
    }

    #[test]
    fn header_byte_count_matches_assembled_length() {
        let entries = vec![BundleHeaderEntry {
            data_item_id: sample_id(7),
            byte_count: 1,
        }];
        let header = assemble_bundle_header(&entries).unwrap();
        assert_eq!(header.len() as u64, header_byte_count(entries.len()));
    }
}
