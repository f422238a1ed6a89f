//! Checksum utilities for nsmeta
//!
//! Journal records are protected by a CRC32C computed over the record
//! header followed by the payload.

/// Streaming CRC32C calculator for journal records
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordChecksum {
    crc: u32,
}

impl RecordChecksum {
    /// Create a new calculator
    #[must_use]
    pub const fn new() -> Self {
        Self { crc: 0 }
    }

    /// Update the calculator with more data
    pub fn update(&mut self, data: &[u8]) {
        self.crc = crc32c::crc32c_append(self.crc, data);
    }

    /// Return the computed checksum
    #[must_use]
    pub const fn finalize(self) -> u32 {
        self.crc
    }
}

/// Quick CRC32C computation
#[inline]
#[must_use]
pub fn compute_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Quick CRC32C verification
#[inline]
#[must_use]
pub fn verify_crc32c(data: &[u8], expected: u32) -> bool {
    crc32c::crc32c(data) == expected
}
