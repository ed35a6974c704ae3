//! Fixed-width record layout.
//!
//! A record is `keySize + payloadSize` bytes: a key (see [`crate::key`])
//! immediately followed by an optional fixed-size payload. `payloadSize`
//! of zero means "keys-only" (pure-key records, e.g. a secondary index).
//! Variable-size payloads are out of scope.

use crate::key::KeySize;

/// Describes the fixed byte layout shared by every record in one
/// [`crate::bucket_set::BucketSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    key_size: KeySize,
    payload_size: usize,
}

impl RecordLayout {
    /// `payload_size == 0` means pure-key records.
    pub fn new(key_size: KeySize, payload_size: usize) -> Self {
        Self {
            key_size,
            payload_size,
        }
    }

    #[inline]
    pub fn key_size(&self) -> usize {
        self.key_size.as_usize()
    }

    #[inline]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    #[inline]
    pub fn rec_size(&self) -> usize {
        self.key_size() + self.payload_size
    }

    /// Splits a whole record (`rec_size()` bytes) into its key and
    /// payload slices.
    #[inline]
    pub fn split<'a>(&self, record: &'a [u8]) -> (&'a [u8], &'a [u8]) {
        debug_assert_eq!(record.len(), self.rec_size());
        record.split_at(self.key_size())
    }

    /// Returns the key slice of a whole record.
    #[inline]
    pub fn key_of<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[..self.key_size()]
    }

    /// Returns the payload slice of a whole record.
    #[inline]
    pub fn payload_of<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.key_size()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_divides_key_and_payload() {
        let layout = RecordLayout::new(KeySize::Twelve, 4);
        assert_eq!(layout.rec_size(), 16);
        let record = [0u8; 16];
        let (k, p) = layout.split(&record);
        assert_eq!(k.len(), 12);
        assert_eq!(p.len(), 4);
    }

    #[test]
    fn zero_payload_is_pure_key() {
        let layout = RecordLayout::new(KeySize::Sixteen, 0);
        assert_eq!(layout.rec_size(), 16);
        assert_eq!(layout.payload_of(&[0u8; 16]).len(), 0);
    }
}
