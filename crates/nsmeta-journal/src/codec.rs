//! Payload field codec
//!
//! Payloads are a flat sequence of big-endian fields:
//!
//! ```text
//! u32/i32      4B
//! u64/i64      8B
//! string/blob  u32 length + bytes
//! list         u32 count + items
//! ```
//!
//! Encoding and size probing share a single field walk ([`Payload::walk`])
//! so the probed length always equals what [`BufSink`] writes.

use bytes::BufMut;
use nsmeta_common::{Error, Result, Timespec};

/// Destination for a payload field walk
pub trait FieldSink {
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_bytes(&mut self, v: &[u8]);

    fn put_i32(&mut self, v: i32) {
        self.put_u32(v as u32);
    }

    fn put_i64(&mut self, v: i64) {
        self.put_u64(v as u64);
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u32(u32::from(v));
    }

    fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    fn put_strs(&mut self, v: &[String]) {
        self.put_u32(list_len(v.len()));
        for s in v {
            self.put_str(s);
        }
    }

    fn put_time(&mut self, t: &Timespec) {
        self.put_i64(t.sec);
        self.put_i32(t.nsec);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn list_len(n: usize) -> u32 {
    n as u32
}

/// Counts the bytes a walk would produce without writing them
#[derive(Debug, Default)]
pub struct SizeProbe {
    pub len: usize,
}

impl FieldSink for SizeProbe {
    fn put_u32(&mut self, _v: u32) {
        self.len += 4;
    }

    fn put_u64(&mut self, _v: u64) {
        self.len += 8;
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.len += 4 + v.len();
    }
}

/// Writes fields into any [`BufMut`]
pub struct BufSink<'a, B: BufMut>(pub &'a mut B);

impl<B: BufMut> FieldSink for BufSink<'_, B> {
    fn put_u32(&mut self, v: u32) {
        self.0.put_u32(v);
    }

    fn put_u64(&mut self, v: u64) {
        self.0.put_u64(v);
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.0.put_u32(list_len(v.len()));
        self.0.put_slice(v);
    }
}

/// Bounds-checked cursor over an encoded payload
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed yet
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Deserialization(format!(
                "payload truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn get_i32(&mut self) -> Result<i32> {
        self.get_u32().map(|v| v as i32)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn get_i64(&mut self) -> Result<i64> {
        self.get_u64().map(|v| v as i64)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.get_u32().map(|v| v != 0)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.take(len).map(<[u8]>::to_vec)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let pos = self.pos;
        String::from_utf8(self.get_bytes()?)
            .map_err(|e| Error::Deserialization(format!("invalid string at offset {pos}: {e}")))
    }

    pub fn get_strings(&mut self) -> Result<Vec<String>> {
        let n = self.get_u32()? as usize;
        // every element needs at least its length prefix
        if n > self.remaining() / 4 {
            return Err(Error::Deserialization(format!(
                "list of {n} strings exceeds payload"
            )));
        }
        (0..n).map(|_| self.get_string()).collect()
    }

    pub fn get_time(&mut self) -> Result<Timespec> {
        Ok(Timespec {
            sec: self.get_i64()?,
            nsec: self.get_i32()?,
        })
    }

    /// Fail if bytes are left over after decoding
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::Deserialization(format!(
                "{} trailing bytes after payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// A journal payload that can be walked for encoding and read back
pub trait Payload: Sized {
    /// Visit every field in wire order
    fn walk<S: FieldSink>(&self, sink: &mut S);

    /// Decode the fields in wire order
    fn read(r: &mut PayloadReader<'_>) -> Result<Self>;

    /// Size-probe pass
    fn encoded_len(&self) -> usize {
        let mut probe = SizeProbe::default();
        self.walk(&mut probe);
        probe.len
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.walk(&mut BufSink(buf));
    }
}

impl Payload for String {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(self);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        r.get_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_matches_written_length() {
        let mut out = Vec::new();
        let mut sink = BufSink(&mut out);
        sink.put_u32(7);
        sink.put_i64(-3);
        sink.put_str("host-a");
        sink.put_strs(&["x".to_string(), String::new()]);
        sink.put_time(&Timespec::new(1, 2));

        let mut probe = SizeProbe::default();
        probe.put_u32(7);
        probe.put_i64(-3);
        probe.put_str("host-a");
        probe.put_strs(&["x".to_string(), String::new()]);
        probe.put_time(&Timespec::new(1, 2));

        assert_eq!(probe.len, out.len());
    }

    #[test]
    fn test_reader_roundtrip_and_bounds() {
        let mut out = Vec::new();
        {
            let mut sink = BufSink(&mut out);
            sink.put_i32(-1);
            sink.put_bool(true);
            sink.put_bytes(&[1, 2, 3]);
        }
        let mut r = PayloadReader::new(&out);
        assert_eq!(r.get_i32().unwrap(), -1);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_bytes().unwrap(), vec![1, 2, 3]);
        r.finish().unwrap();
        assert!(matches!(r.get_u32(), Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_oversized_list_rejected() {
        let mut out = Vec::new();
        BufSink(&mut out).put_u32(1_000_000);
        let mut r = PayloadReader::new(&out);
        assert!(r.get_strings().is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut out = Vec::new();
        BufSink(&mut out).put_bytes(&[0xff, 0xfe]);
        assert!(PayloadReader::new(&out).get_string().is_err());
    }
}
