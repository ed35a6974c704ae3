//! Fixed-width keys, collation, and the negative-key (tombstone) convention.
//!
//! A key is a byte string of width [`KeySize`], compared as an unsigned
//! little-endian integer with the least-significant bit of byte 0 defined
//! as the **deletion bit**. Two comparators exist:
//!
//! - [`strict_compare`] treats all bytes as significant.
//! - [`masked_compare`] ignores the deletion bit of byte 0, so that a
//!   positive key `k` and its negative twin `k | 1` collate equal.
//!
//! Grounded on `RdbBuckets.h`'s header comment: "when selecting bucketnum
//! and also when deduping, use `KEYCMPNEGEQ` which will mask off the
//! delbit... When getting or deleting a list, use `KEYCMP` within a
//! bucket and use `KEYCMPNEGEQ` to select the bucket nums."

use std::cmp::Ordering;
use std::fmt;

/// The fixed key widths a [`crate::bucket_set::BucketSet`] may be
/// configured with. Chosen once at construction; never changes for the
/// lifetime of the instance (no dynamic key width, per the Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySize {
    Twelve = 12,
    Sixteen = 16,
    TwentyFour = 24,
    TwentyEight = 28,
}

impl KeySize {
    /// Width in bytes.
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    /// Construct from a raw byte width, rejecting anything not in
    /// `{12, 16, 24, 28}`.
    pub fn from_usize(width: usize) -> Option<Self> {
        match width {
            12 => Some(Self::Twelve),
            16 => Some(Self::Sixteen),
            24 => Some(Self::TwentyFour),
            28 => Some(Self::TwentyEight),
            _ => None,
        }
    }
}

/// A small signed integer identifying the collection owning a record.
/// Buckets never mix collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollNum(pub i32);

impl fmt::Display for CollNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the RDB (record-database) variant a [`crate::bucket_set::BucketSet`]
/// belongs to. Affects only the on-disk tag, never collation or comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RdbId(pub u8);

impl fmt::Display for RdbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rdb#{}", self.0)
    }
}

/// Returns `true` if `key`'s deletion bit (bit 0 of byte 0) is set.
#[inline]
pub fn is_negative(key: &[u8]) -> bool {
    debug_assert!(!key.is_empty(), "key must be non-empty");
    key[0] & 1 != 0
}

/// Returns the negative twin of `key` (deletion bit set).
pub fn negative_twin(key: &[u8]) -> Vec<u8> {
    let mut twin = key.to_vec();
    if let Some(b0) = twin.first_mut() {
        *b0 |= 1;
    }
    twin
}

/// Returns the positive twin of `key` (deletion bit cleared).
pub fn positive_twin(key: &[u8]) -> Vec<u8> {
    let mut twin = key.to_vec();
    if let Some(b0) = twin.first_mut() {
        *b0 &= !1;
    }
    twin
}

/// STRICT comparison: all bytes significant, little-endian unsigned
/// integer order (byte 0 is least significant).
#[inline]
pub fn strict_compare(a: &[u8], b: &[u8]) -> Ordering {
    debug_assert_eq!(a.len(), b.len(), "keys must share a width");
    for i in (0..a.len()).rev() {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// MASKED comparison: identical to [`strict_compare`] except the deletion
/// bit of byte 0 is ignored, so a positive key and its negative twin
/// collate equal.
#[inline]
pub fn masked_compare(a: &[u8], b: &[u8]) -> Ordering {
    debug_assert_eq!(a.len(), b.len(), "keys must share a width");
    for i in (1..a.len()).rev() {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    (a[0] & !1).cmp(&(b[0] & !1))
}

/// `Display` wrapper rendering a key as lowercase hex, truncating long
/// keys. Reused, in spirit, from the teacher's `memtable::HexKey`.
pub struct HexKey<'a>(pub &'a [u8]);

impl fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
