//! The byte-packed record list — the "external list format" byte-level
//! contract §1 requires BUCKETS to honor for `get_list`/`add_list`/
//! `delete_list`.
//!
//! Full decode/re-encode semantics of this format belong to an external
//! list consumer per the original design (§9, first Open Question); this
//! module implements the minimal self-describing framing BUCKETS itself
//! needs to produce and consume lists, choosing a concrete elision rule
//! for `use_half_keys` (recorded in `DESIGN.md`).
//!
//! # Wire format
//!
//! Each record is encoded as:
//!
//! ```text
//! [u8 elided][ (key_size - elided) literal key bytes ][ payload_size bytes ]
//! ```
//!
//! `elided` counts how many of the key's high-order bytes (the tail of the
//! little-endian byte array) are identical to the *previous* record's key
//! in the same list and have therefore been dropped. It is always `0` when
//! `use_half_keys` is `false`, or for the first record in a list. Because
//! BUCKETS never emits two records with the same key into one list,
//! `elided` is always strictly less than `key_size`.

use crate::record::RecordLayout;

/// An append-only, byte-packed sequence of records, built by
/// [`crate::bucket::Bucket::get_list`] / [`crate::bucket_set::BucketSet::get_list`]
/// and consumed by [`crate::bucket::Bucket::delete_list`] /
/// [`crate::bucket_set::BucketSet::add_list`].
#[derive(Debug, Default, Clone)]
pub struct RecordList {
    buf: Vec<u8>,
    /// Count of records encoded so far, kept alongside `buf` so `len()`
    /// doesn't require a decode pass.
    count: usize,
}

impl RecordList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently buffered.
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of records appended so far.
    pub fn record_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn from_bytes(buf: Vec<u8>, count: usize) -> Self {
        Self { buf, count }
    }

    /// Computes how many high-order (trailing, in little-endian byte-array
    /// terms) bytes `key` shares with `prev_key`, capped so at least one
    /// literal byte always remains.
    fn elided_count(key: &[u8], prev_key: Option<&[u8]>, use_half_keys: bool) -> usize {
        let Some(prev) = prev_key.filter(|_| use_half_keys) else {
            return 0;
        };
        debug_assert_eq!(key.len(), prev.len());
        let key_size = key.len();
        let mut elided = 0usize;
        while elided + 1 < key_size && key[key_size - 1 - elided] == prev[key_size - 1 - elided] {
            elided += 1;
        }
        elided
    }

    /// The on-wire size a record would occupy if pushed now, without
    /// mutating `self`. Used by callers enforcing a byte budget
    /// (`min_rec_sizes`) to decide whether to stop *before* pushing.
    pub fn peek_encoded_len(
        &self,
        layout: &RecordLayout,
        key: &[u8],
        prev_key: Option<&[u8]>,
        use_half_keys: bool,
    ) -> usize {
        let elided = Self::elided_count(key, prev_key, use_half_keys);
        1 + (layout.key_size() - elided) + layout.payload_size()
    }

    /// Appends one record. `prev_key` is the key of the previous record
    /// pushed into *this* list (not necessarily the previous record in a
    /// bucket), so half-key elision is always relative to what a decoder
    /// will have already reconstructed.
    pub fn push_record(
        &mut self,
        layout: &RecordLayout,
        key: &[u8],
        payload: &[u8],
        prev_key: Option<&[u8]>,
        use_half_keys: bool,
    ) {
        debug_assert_eq!(key.len(), layout.key_size());
        debug_assert_eq!(payload.len(), layout.payload_size());
        let elided = Self::elided_count(key, prev_key, use_half_keys);
        let literal_len = layout.key_size() - elided;
        self.buf.push(elided as u8);
        self.buf.extend_from_slice(&key[..literal_len]);
        self.buf.extend_from_slice(payload);
        self.count += 1;
    }

    /// Iterates decoded `(key, payload)` pairs in encounter order.
    pub fn iter_records<'a>(&'a self, layout: &'a RecordLayout) -> RecordListIter<'a> {
        RecordListIter {
            layout,
            buf: &self.buf,
            offset: 0,
            prev_key: None,
        }
    }

    /// Iterates decoded keys only, discarding payloads (used by
    /// `delete_list`, which only needs to locate records by key).
    pub fn iter_keys<'a>(&'a self, layout: &'a RecordLayout) -> impl Iterator<Item = Vec<u8>> + 'a {
        self.iter_records(layout).map(|(k, _)| k)
    }
}

/// Iterator over decoded `(key, payload)` pairs of a [`RecordList`].
pub struct RecordListIter<'a> {
    layout: &'a RecordLayout,
    buf: &'a [u8],
    offset: usize,
    prev_key: Option<Vec<u8>>,
}

impl Iterator for RecordListIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }
        let elided = self.buf[self.offset] as usize;
        self.offset += 1;

        let key_size = self.layout.key_size();
        let literal_len = key_size - elided;
        let literal = &self.buf[self.offset..self.offset + literal_len];
        self.offset += literal_len;

        let mut key = Vec::with_capacity(key_size);
        key.extend_from_slice(literal);
        if elided > 0 {
            let prev = self
                .prev_key
                .as_ref()
                .expect("elided bytes require a previous key");
            key.extend_from_slice(&prev[literal_len..]);
        }

        let payload_size = self.layout.payload_size();
        let payload = self.buf[self.offset..self.offset + payload_size].to_vec();
        self.offset += payload_size;

        self.prev_key = Some(key.clone());
        Some((key, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySize;

    fn layout() -> RecordLayout {
        RecordLayout::new(KeySize::Twelve, 4)
    }

    #[test]
    fn round_trips_without_half_keys() {
        let layout = layout();
        let mut list = RecordList::new();
        let keys: Vec<Vec<u8>> = (0..5)
            .map(|i| {
                let mut k = vec![0u8; 12];
                k[11] = i as u8;
                k
            })
            .collect();
        let mut prev = None;
        for k in &keys {
            list.push_record(&layout, k, &[1, 2, 3, 4], prev.as_deref(), false);
            prev = Some(k.clone());
        }
        let decoded: Vec<Vec<u8>> = list.iter_records(&layout).map(|(k, _)| k).collect();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn round_trips_with_half_keys_elision() {
        let layout = layout();
        let mut list = RecordList::new();
        let keys: Vec<Vec<u8>> = (0..10)
            .map(|i| {
                let mut k = vec![0u8; 12];
                k[11] = 0x20; // shared high byte across all keys
                k[0] = i as u8;
                k
            })
            .collect();
        let mut prev = None;
        for k in &keys {
            list.push_record(&layout, k, &[9, 9, 9, 9], prev.as_deref(), true);
            prev = Some(k.clone());
        }
        // every record after the first should have elided exactly one byte
        let raw = list.as_bytes();
        assert_eq!(raw[0], 0); // first record never elides
        let decoded: Vec<Vec<u8>> = list.iter_records(&layout).map(|(k, _)| k).collect();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn payloads_survive_round_trip() {
        let layout = layout();
        let mut list = RecordList::new();
        list.push_record(&layout, &[1u8; 12], &[0xAA; 4], None, true);
        list.push_record(&layout, &[2u8; 12], &[0xBB; 4], Some(&[1u8; 12]), true);
        let decoded: Vec<(Vec<u8>, Vec<u8>)> = list.iter_records(&layout).collect();
        assert_eq!(decoded[0].1, vec![0xAA; 4]);
        assert_eq!(decoded[1].1, vec![0xBB; 4]);
    }
}
