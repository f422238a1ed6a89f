//! Journal record framing
//!
//! Record format:
//! ```text
//! +-------+--------+------+--------+---------+--------+
//! | Magic | Seqnum | Tag  | Length | Payload | CRC32C |
//! | 4B    | 8B     | 2B   | 4B     | var     | 4B     |
//! +-------+--------+------+--------+---------+--------+
//! ```
//! All integers are big-endian. The CRC covers the header and payload.

use crate::ops::{JournalOp, OperationTag};
use bytes::{BufMut, Bytes, BytesMut};
use nsmeta_common::checksum::{RecordChecksum, verify_crc32c};
use nsmeta_common::{Error, Result, Seqnum};

/// Record magic
pub const RECORD_MAGIC: [u8; 4] = *b"GfMr";

/// Record header size (magic + seqnum + tag + length)
pub const RECORD_HEADER_SIZE: usize = 18;

/// Trailing CRC size
pub const RECORD_CRC_SIZE: usize = 4;

/// Largest payload accepted by the writer and the open-time scan
pub const RECORD_PAYLOAD_MAX: usize = 1024 * 1024;

/// Fixed record header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub seqnum: Seqnum,
    /// Raw tag; may not map to a known [`OperationTag`]
    pub tag: u16,
    pub payload_len: u32,
}

impl RecordHeader {
    /// Parse a header, returning `None` if the buffer is short or the
    /// magic does not match.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_SIZE || buf[0..4] != RECORD_MAGIC {
            return None;
        }
        Some(Self {
            seqnum: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            tag: u16::from_be_bytes(buf[12..14].try_into().unwrap()),
            payload_len: u32::from_be_bytes(buf[14..18].try_into().unwrap()),
        })
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&RECORD_MAGIC);
        buf.put_u64(self.seqnum);
        buf.put_u16(self.tag);
        buf.put_u32(self.payload_len);
    }

    /// Total on-disk size including header and CRC
    #[must_use]
    pub const fn record_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload_len as usize + RECORD_CRC_SIZE
    }

    pub fn op_tag(&self) -> Result<OperationTag> {
        OperationTag::from_u16(self.tag).ok_or_else(|| {
            Error::Deserialization(format!(
                "unknown operation tag {} at seqnum {}",
                self.tag, self.seqnum
            ))
        })
    }
}

/// Total on-disk size of a record carrying `op`
#[must_use]
pub fn record_len(op: &JournalOp) -> usize {
    RECORD_HEADER_SIZE + op.encoded_len() + RECORD_CRC_SIZE
}

/// Frame `op` as a complete record
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn encode_record(seqnum: Seqnum, op: &JournalOp) -> Bytes {
    let payload_len = op.encoded_len();
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload_len + RECORD_CRC_SIZE);
    RecordHeader {
        seqnum,
        tag: op.tag() as u16,
        payload_len: payload_len as u32,
    }
    .write(&mut buf);
    op.encode_into(&mut buf);
    debug_assert_eq!(buf.len(), RECORD_HEADER_SIZE + payload_len);

    let mut crc = RecordChecksum::new();
    crc.update(&buf);
    buf.put_u32(crc.finalize());
    buf.freeze()
}

/// A decoded journal record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalRecord {
    pub seqnum: Seqnum,
    pub op: JournalOp,
}

impl JournalRecord {
    #[must_use]
    pub const fn new(seqnum: Seqnum, op: JournalOp) -> Self {
        Self { seqnum, op }
    }

    /// Serialize to the on-disk format
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        encode_record(self.seqnum, &self.op)
    }

    /// Parse one record from the start of `data`, returning it with its
    /// on-disk length.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let header =
            RecordHeader::parse(data).ok_or_else(|| Error::corrupt(0, "invalid record magic"))?;
        let (body, _) = split_record(&header, data, 0)?;
        let op = JournalOp::decode(header.op_tag()?, body)?;
        Ok((
            Self {
                seqnum: header.seqnum,
                op,
            },
            header.record_len(),
        ))
    }
}

/// Check the CRC of a record at the start of `data` and return its payload
/// and length. `offset` is only used for error reporting.
pub fn split_record<'a>(
    header: &RecordHeader,
    data: &'a [u8],
    offset: u64,
) -> Result<(&'a [u8], usize)> {
    let payload_len = header.payload_len as usize;
    if payload_len > RECORD_PAYLOAD_MAX {
        return Err(Error::corrupt(
            offset,
            format!("record length {payload_len} exceeds limit"),
        ));
    }
    let total = header.record_len();
    if data.len() < total {
        return Err(Error::corrupt(offset, "record truncated"));
    }
    let body_end = RECORD_HEADER_SIZE + payload_len;
    let stored = u32::from_be_bytes(data[body_end..total].try_into().unwrap());
    if !verify_crc32c(&data[..body_end], stored) {
        return Err(Error::corrupt(
            offset,
            format!("CRC mismatch at seqnum {}", header.seqnum),
        ));
    }
    Ok((&data[RECORD_HEADER_SIZE..body_end], total))
}

/// Iterates over a buffer of back-to-back serialized records, verifying
/// each CRC without decoding payloads.
pub struct RawRecords<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RawRecords<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for RawRecords<'a> {
    type Item = Result<(RecordHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let offset = self.pos as u64;
        let Some(header) = RecordHeader::parse(rest) else {
            self.pos = self.data.len();
            return Some(Err(Error::corrupt(offset, "invalid record magic")));
        };
        match split_record(&header, rest, offset) {
            Ok((_, len)) => {
                self.pos += len;
                Some(Ok((header, &rest[..len])))
            }
            Err(e) => {
                self.pos = self.data.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{DirEntryArg, JournalOp};

    fn direntry(name: &str) -> JournalOp {
        JournalOp::DirentryAdd(DirEntryArg {
            dir_ino: 2,
            name: name.into(),
            entry_ino: 3,
        })
    }

    #[test]
    fn test_record_roundtrip() {
        let rec = JournalRecord::new(42, direntry("hello"));
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), record_len(&rec.op));
        assert_eq!(&bytes[0..4], b"GfMr");

        let (decoded, len) = JournalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn test_empty_payload_record() {
        let bytes = JournalRecord::new(1, JournalOp::Begin).to_bytes();
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE + RECORD_CRC_SIZE);
        let header = RecordHeader::parse(&bytes).unwrap();
        assert_eq!(header.op_tag().unwrap(), OperationTag::Begin);
        assert_eq!(header.payload_len, 0);
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut bytes = JournalRecord::new(7, direntry("a")).to_bytes().to_vec();
        let last = bytes.len() - 6;
        bytes[last] ^= 0x40;
        assert!(matches!(
            JournalRecord::from_bytes(&bytes),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = BytesMut::new();
        RecordHeader {
            seqnum: 1,
            tag: 999,
            payload_len: 0,
        }
        .write(&mut buf);
        let crc = nsmeta_common::checksum::compute_crc32c(&buf);
        buf.put_u32(crc);
        assert!(matches!(
            JournalRecord::from_bytes(&buf),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_raw_records_iteration() {
        let mut batch = Vec::new();
        for seq in 10..13 {
            batch.extend_from_slice(&JournalRecord::new(seq, direntry("x")).to_bytes());
        }
        let seqs: Vec<_> = RawRecords::new(&batch)
            .map(|r| r.unwrap().0.seqnum)
            .collect();
        assert_eq!(seqs, vec![10, 11, 12]);

        batch.truncate(batch.len() - 1);
        let results: Vec<_> = RawRecords::new(&batch).collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }
}
