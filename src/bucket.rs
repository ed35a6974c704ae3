//! The `Bucket` leaf (§4.1): a contiguous, mostly-sorted micro-array of
//! fixed-width records for one collection.
//!
//! A bucket holds records in a single `Vec<u8>` buffer: a sorted prefix
//! (`[0, last_sorted)`) followed by an unsorted tail of newly appended
//! records (`[last_sorted, num_keys)`). `add_key` only ever appends to the
//! tail; `sort` merges the tail into the prefix, collapsing MASKED-equal
//! duplicates (the negative-key/tombstone convention, see `crate::key`)
//! along the way. Lookups and range scans that require the sorted
//! invariant call `sort` first if the tail is non-empty.

use std::cmp::Ordering;

use crate::alloc::BucketAllocator;
use crate::error::{BucketError, Result};
use crate::key::{self, CollNum};
use crate::list::RecordList;
use crate::record::RecordLayout;
use crate::yield_hook::{Breather, YieldOutcome};

/// Tag used when requesting record-buffer memory from a [`BucketAllocator`].
pub const ALLOC_TAG: &str = "bucket.records";

/// Outcome of a successful [`Bucket::sort`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Records removed because a later record (by insertion time) shared
    /// the same MASKED key.
    pub dup_collapsed: usize,
    /// Of `dup_collapsed`, how many of the *dropped* records were
    /// themselves negative (tombstone) keys.
    pub neg_dropped: usize,
}

/// Outcome of [`Bucket::split`].
#[derive(Debug)]
pub enum SplitOutcome {
    /// The bucket was split in two; `self` keeps the lower half and
    /// `new_bucket` receives the upper half.
    Split,
    /// No legal MASKED-respecting split point existed (e.g. every key in
    /// the bucket collates equal under MASKED comparison); the bucket was
    /// left untouched. The caller should treat this like a full bucket
    /// that cannot shed load — §4.1 "non-splitting fallback".
    NonSplitting,
}

/// A single bucket: a sorted (once `sort` has run) micro-array of records
/// belonging to exactly one collection.
pub struct Bucket {
    layout: RecordLayout,
    collnum: CollNum,
    capacity: usize,
    buf: Vec<u8>,
    num_keys: usize,
    last_sorted: usize,
    /// MASKED-maximum key among the unsorted tail, maintained incrementally
    /// by `add_key`. `None` whenever the tail is empty (including right
    /// after `sort`). Lets `true_last_key` report the bucket's real upper
    /// bound without forcing an eager sort on every directory lookup.
    tail_max: Option<Vec<u8>>,
}

impl Bucket {
    /// Allocates a new, empty bucket able to hold up to `capacity` records
    /// of `layout`'s shape, tagged `tag` with `alloc`.
    pub fn new(
        layout: RecordLayout,
        collnum: CollNum,
        capacity: usize,
        alloc: &dyn BucketAllocator,
    ) -> Result<Self> {
        let buf = alloc
            .alloc(capacity * layout.rec_size(), ALLOC_TAG)
            .ok_or(BucketError::OutOfMemory)?;
        Ok(Self {
            layout,
            collnum,
            capacity,
            buf,
            num_keys: 0,
            last_sorted: 0,
            tail_max: None,
        })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn collnum(&self) -> CollNum {
        self.collnum
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn is_full(&self) -> bool {
        self.num_keys >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.num_keys == 0
    }

    /// `true` once every record is part of the sorted prefix — the
    /// precondition for `get_node` / binary-search based lookups.
    pub fn is_sorted(&self) -> bool {
        self.last_sorted == self.num_keys
    }

    fn rec_size(&self) -> usize {
        self.layout.rec_size()
    }

    fn key_size(&self) -> usize {
        self.layout.key_size()
    }

    fn record_at(&self, i: usize) -> &[u8] {
        let rs = self.rec_size();
        &self.buf[i * rs..(i + 1) * rs]
    }

    fn key_at(&self, i: usize) -> &[u8] {
        self.layout.key_of(self.record_at(i))
    }

    /// The key at directory position `i` (0-indexed within this bucket).
    /// Requires `i < num_keys()`.
    pub fn key_at_index(&self, i: usize) -> &[u8] {
        self.key_at(i)
    }

    /// First (lowest-ordered) key, if any. Requires the bucket to contain
    /// at least one record; does not require sortedness of the tail,
    /// since the prefix (index 0) is always the lowest sorted entry —
    /// callers scanning directory bounds should `sort` first if the tail
    /// may hold a smaller key than the prefix's first entry.
    pub fn first_key(&self) -> Option<Vec<u8>> {
        if self.num_keys == 0 {
            None
        } else {
            Some(self.key_at(0).to_vec())
        }
    }

    /// Last key of the sorted prefix. Callers needing the true maximum
    /// across the whole bucket (prefix + tail) must `sort` first, or use
    /// [`Bucket::true_last_key`].
    pub fn last_sorted_key(&self) -> Option<Vec<u8>> {
        if self.last_sorted == 0 {
            None
        } else {
            Some(self.key_at(self.last_sorted - 1).to_vec())
        }
    }

    /// True MASKED-maximum key across the sorted prefix and the unsorted
    /// tail, without requiring a prior `sort`. Used as a directory routing
    /// boundary, where forcing an eager sort on every lookup would defeat
    /// the tail-append design's amortized O(1) insert.
    pub fn true_last_key(&self) -> Option<Vec<u8>> {
        match (self.last_sorted_key(), &self.tail_max) {
            (Some(last), Some(tail_max)) => {
                if key::masked_compare(tail_max, &last) == Ordering::Greater {
                    Some(tail_max.clone())
                } else {
                    Some(last)
                }
            }
            (Some(last), None) => Some(last),
            (None, Some(tail_max)) => Some(tail_max.clone()),
            (None, None) => None,
        }
    }

    /// Appends one record to the tail. Fails with `None` (caller should
    /// treat this as "bucket full") rather than panicking; callers are
    /// expected to check [`Bucket::is_full`] beforehand or handle this by
    /// routing the write to `split`.
    pub fn add_key(&mut self, key: &[u8], payload: &[u8]) -> bool {
        debug_assert_eq!(key.len(), self.key_size());
        debug_assert_eq!(payload.len(), self.layout.payload_size());
        if self.is_full() {
            return false;
        }
        let rs = self.rec_size();
        let start = self.num_keys * rs;
        self.buf[start..start + self.key_size()].copy_from_slice(key);
        self.buf[start + self.key_size()..start + rs].copy_from_slice(payload);
        self.num_keys += 1;
        match &self.tail_max {
            Some(cur) if key::masked_compare(key, cur) != Ordering::Greater => {}
            _ => self.tail_max = Some(key.to_vec()),
        }
        true
    }

    /// Merges the unsorted tail into the sorted prefix, stably preferring
    /// more recently inserted records on an exact (STRICT) key tie, then
    /// collapses adjacent MASKED-equal pairs (a positive key and its
    /// negative twin), keeping the later one in sorted order — always the
    /// negative twin, when both are present, per the masked-comparison
    /// convention (`crate::key::masked_compare`).
    pub fn sort(&mut self, scratch: &mut Vec<u8>, breather: &mut Breather<'_>) -> Result<SortStats> {
        if self.is_sorted() {
            return Ok(SortStats::default());
        }
        let rec_size = self.rec_size();
        let key_size = self.key_size();

        let mut tail: Vec<Vec<u8>> = self.buf[self.last_sorted * rec_size..self.num_keys * rec_size]
            .chunks_exact(rec_size)
            .map(|r| r.to_vec())
            .collect();
        tail.sort_by(|a, b| key::strict_compare(&a[..key_size], &b[..key_size]));

        let mut merged: Vec<Vec<u8>> = Vec::with_capacity(self.last_sorted + tail.len());
        let mut dup_collapsed = 0usize;
        let mut neg_dropped = 0usize;

        let mut i = 0usize;
        let mut j = 0usize;
        while i < self.last_sorted && j < tail.len() {
            let prefix_rec = self.record_at(i);
            let tail_rec = &tail[j];
            match key::strict_compare(&prefix_rec[..key_size], &tail_rec[..key_size]) {
                Ordering::Less => {
                    merged.push(prefix_rec.to_vec());
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(tail_rec.clone());
                    j += 1;
                }
                Ordering::Equal => {
                    // Exact tie: the tail entry is the more recent write.
                    if key::is_negative(&prefix_rec[..key_size]) {
                        neg_dropped += 1;
                    }
                    dup_collapsed += 1;
                    merged.push(tail_rec.clone());
                    i += 1;
                    j += 1;
                }
            }
            if breather.breathe() == YieldOutcome::Cancel {
                return Err(BucketError::Cancelled);
            }
        }
        while i < self.last_sorted {
            merged.push(self.record_at(i).to_vec());
            i += 1;
        }
        merged.extend(tail.drain(j..));

        // merged is now strictly ascending by STRICT key with no ties. A
        // MASKED-equal group can only ever be size 2 (a key and its
        // negative twin differ in exactly one bit), and STRICT order
        // always places the positive member first, so a single forward
        // scan suffices.
        let mut deduped: Vec<Vec<u8>> = Vec::with_capacity(merged.len());
        let mut k = 0usize;
        while k < merged.len() {
            if k + 1 < merged.len()
                && key::masked_compare(&merged[k][..key_size], &merged[k + 1][..key_size])
                    == Ordering::Equal
            {
                if key::is_negative(&merged[k][..key_size]) {
                    neg_dropped += 1;
                }
                dup_collapsed += 1;
                deduped.push(merged[k + 1].clone());
                k += 2;
            } else {
                deduped.push(merged[k].clone());
                k += 1;
            }
            if breather.breathe() == YieldOutcome::Cancel {
                return Err(BucketError::Cancelled);
            }
        }

        scratch.clear();
        scratch.reserve(deduped.len() * rec_size);
        for rec in &deduped {
            scratch.extend_from_slice(rec);
        }
        self.buf[..scratch.len()].copy_from_slice(scratch);

        self.num_keys = deduped.len();
        self.last_sorted = deduped.len();
        self.tail_max = None;

        Ok(SortStats {
            dup_collapsed,
            neg_dropped,
        })
    }

    /// STRICT binary search for `key`'s exact record index. Requires
    /// [`Bucket::is_sorted`].
    fn get_node(&self, key: &[u8]) -> Option<usize> {
        debug_assert!(self.is_sorted(), "get_node requires a sorted bucket");
        let key_size = self.key_size();
        let mut lo = 0usize;
        let mut hi = self.num_keys;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match key::strict_compare(self.key_at(mid), &key[..key_size]) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// MASKED binary search: finds the record whose key collates equal to
    /// `key` ignoring the deletion bit. Returns the payload slice if
    /// found, regardless of whether the stored record is positive or
    /// negative (callers distinguish via `key::is_negative` on the
    /// returned key if needed — use [`Bucket::get_key_val`] to get both).
    pub fn get_key_val(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        debug_assert!(self.is_sorted(), "get_key_val requires a sorted bucket");
        let key_size = self.key_size();
        let mut lo = 0usize;
        let mut hi = self.num_keys;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match key::masked_compare(self.key_at(mid), &key[..key_size]) {
                Ordering::Equal => return Some(self.layout.split(self.record_at(mid))),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Appends every record in `[start_key, end_key]` (MASKED lower
    /// bound, STRICT upper bound per §4.1) into `out`, stopping once
    /// `out` would exceed `min_rec_sizes` bytes (a soft cap: the record
    /// that would cross the budget is never appended, but at least one
    /// record is always appended if the range is non-empty and `out` is
    /// currently empty). Returns the number of records appended.
    pub fn get_list(
        &self,
        out: &mut RecordList,
        start_key: &[u8],
        end_key: &[u8],
        min_rec_sizes: usize,
        use_half_keys: bool,
        breather: &mut Breather<'_>,
    ) -> Result<usize> {
        debug_assert!(self.is_sorted(), "get_list requires a sorted bucket");
        let key_size = self.key_size();

        // MASKED lower bound: first index whose key is >= start_key under
        // masked comparison.
        let mut lo = 0usize;
        let mut hi = self.num_keys;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if key::masked_compare(self.key_at(mid), &start_key[..key_size]) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let mut appended = 0usize;
        let mut prev_key: Option<Vec<u8>> = None;
        let mut idx = lo;
        while idx < self.num_keys {
            let record = self.record_at(idx);
            let rec_key = self.layout.key_of(record);
            if key::strict_compare(rec_key, &end_key[..key_size]) == Ordering::Greater {
                break;
            }
            let candidate_len =
                out.peek_encoded_len(&self.layout, rec_key, prev_key.as_deref(), use_half_keys);
            if !out.is_empty() && out.byte_len() + candidate_len > min_rec_sizes {
                break;
            }
            out.push_record(
                &self.layout,
                rec_key,
                self.layout.payload_of(record),
                prev_key.as_deref(),
                use_half_keys,
            );
            prev_key = Some(rec_key.to_vec());
            appended += 1;
            idx += 1;
            if breather.breathe() == YieldOutcome::Cancel {
                return Err(BucketError::Cancelled);
            }
        }
        Ok(appended)
    }

    /// Removes every record whose key STRICT-matches an entry of `keys`,
    /// shifting remaining records left to keep the buffer contiguous.
    /// Requires [`Bucket::is_sorted`]. Returns the number of records
    /// removed.
    pub fn delete_list<'a>(&mut self, keys: impl IntoIterator<Item = &'a [u8]>) -> usize {
        debug_assert!(self.is_sorted(), "delete_list requires a sorted bucket");
        let mut removed = 0usize;
        for key in keys {
            if let Some(idx) = self.get_node(key) {
                let rec_size = self.rec_size();
                self.buf
                    .copy_within((idx + 1) * rec_size..self.num_keys * rec_size, idx * rec_size);
                self.num_keys -= 1;
                self.last_sorted -= 1;
                removed += 1;
            }
        }
        removed
    }

    /// Splits this (full, sorted) bucket in half by record count,
    /// choosing the split boundary so that no MASKED-equal pair is torn
    /// across the two halves (shifting the boundary forward until a
    /// MASKED-inequality is found). `new_bucket` must be empty.
    ///
    /// Returns [`SplitOutcome::NonSplitting`] — leaving both buckets
    /// untouched — if every adjacent pair in the bucket is MASKED-equal
    /// (the entire bucket is conceptually one oversized MASKED group),
    /// which cannot be resolved by splitting.
    pub fn split(&mut self, new_bucket: &mut Bucket) -> Result<SplitOutcome> {
        debug_assert!(self.is_sorted(), "split requires a sorted bucket");
        debug_assert!(new_bucket.is_empty(), "split target must be empty");
        if self.num_keys < 2 {
            return Ok(SplitOutcome::NonSplitting);
        }
        let mid = self.num_keys / 2;

        // Walk forward from `mid` until a MASKED-respecting boundary is
        // found, i.e. key_at(boundary-1) and key_at(boundary) are MASKED-
        // unequal. Bounded search within +/- a quarter of the bucket, per
        // §4.1's non-splitting fallback.
        let quarter = (self.num_keys / 4).max(1);
        let lo_bound = mid.saturating_sub(quarter).max(1);
        let hi_bound = (mid + quarter).min(self.num_keys - 1);

        let mut boundary = None;
        for offset in 0..=quarter {
            for candidate in [mid + offset, mid.saturating_sub(offset)] {
                if candidate < lo_bound || candidate > hi_bound {
                    continue;
                }
                if key::masked_compare(self.key_at(candidate - 1), self.key_at(candidate))
                    != Ordering::Equal
                {
                    boundary = Some(candidate);
                    break;
                }
            }
            if boundary.is_some() {
                break;
            }
        }

        let Some(boundary) = boundary else {
            return Ok(SplitOutcome::NonSplitting);
        };

        let rec_size = self.rec_size();
        let upper_start = boundary * rec_size;
        let upper_end = self.num_keys * rec_size;
        let upper_count = self.num_keys - boundary;
        if upper_count > new_bucket.capacity {
            return Err(BucketError::InvariantViolation(
                "split target bucket too small to hold upper half".into(),
            ));
        }

        new_bucket.buf[..upper_end - upper_start].copy_from_slice(&self.buf[upper_start..upper_end]);
        new_bucket.num_keys = upper_count;
        new_bucket.last_sorted = upper_count;

        self.num_keys = boundary;
        self.last_sorted = boundary;

        Ok(SplitOutcome::Split)
    }

    /// Exact count of negative (tombstone) keys, by a full scan. See
    /// [`crate::bucket_set::BucketSet::get_num_negative_keys`] for the
    /// cheaper, approximate, directory-wide variant.
    pub fn num_negative_keys_exact(&self) -> usize {
        (0..self.num_keys)
            .filter(|&i| key::is_negative(self.key_at(i)))
            .count()
    }

    pub fn num_positive_keys_exact(&self) -> usize {
        self.num_keys - self.num_negative_keys_exact()
    }

    /// Re-validates internal invariants: sorted prefix is strictly
    /// ascending under STRICT order, and no two sorted entries are
    /// MASKED-equal. Returns an error describing the first violation.
    pub fn self_test(&self) -> Result<()> {
        for i in 1..self.last_sorted {
            if key::strict_compare(self.key_at(i - 1), self.key_at(i)) != Ordering::Less {
                return Err(BucketError::InvariantViolation(format!(
                    "bucket for coll {} not strictly ascending at index {i}",
                    self.collnum
                )));
            }
            if key::masked_compare(self.key_at(i - 1), self.key_at(i)) == Ordering::Equal {
                return Err(BucketError::InvariantViolation(format!(
                    "bucket for coll {} has unresolved MASKED duplicate at index {i}",
                    self.collnum
                )));
            }
        }
        Ok(())
    }

    /// Raw record bytes, for snapshotting. Only the populated prefix
    /// (`[0, num_keys)`) is meaningful.
    pub fn raw_records(&self) -> &[u8] {
        &self.buf[..self.num_keys * self.rec_size()]
    }

    /// Rebuilds a bucket from previously snapshotted raw record bytes.
    /// The caller is responsible for having already validated `raw` is a
    /// multiple of the record size and fits within `capacity`.
    pub fn from_raw_records(
        layout: RecordLayout,
        collnum: CollNum,
        capacity: usize,
        raw: &[u8],
        alloc: &dyn BucketAllocator,
    ) -> Result<Self> {
        let rec_size = layout.rec_size();
        debug_assert_eq!(raw.len() % rec_size, 0);
        let num_keys = raw.len() / rec_size;
        let mut buf = alloc
            .alloc(capacity * rec_size, ALLOC_TAG)
            .ok_or(BucketError::OutOfMemory)?;
        buf[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            layout,
            collnum,
            capacity,
            buf,
            num_keys,
            last_sorted: num_keys,
            tail_max: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;
    use crate::key::KeySize;
    use crate::yield_hook::NoopYieldHook;

    fn layout() -> RecordLayout {
        RecordLayout::new(KeySize::Twelve, 4)
    }

    fn key_of(n: u32) -> Vec<u8> {
        let mut k = vec![0u8; 12];
        k[4..8].copy_from_slice(&n.to_le_bytes());
        k
    }

    fn make_bucket(capacity: usize) -> Bucket {
        let alloc = Box::leak(Box::new(SystemAllocator::new()));
        Bucket::new(layout(), CollNum(0), capacity, alloc).unwrap()
    }

    #[test]
    fn add_and_sort_orders_by_key() {
        let mut b = make_bucket(16);
        for n in [5u32, 1, 3, 2, 4] {
            assert!(b.add_key(&key_of(n), &[0; 4]));
        }
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        assert!(b.self_test().is_ok());
        let keys: Vec<u32> = (0..b.num_keys())
            .map(|i| u32::from_le_bytes(b.key_at(i)[4..8].try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sort_collapses_negative_twin_keeping_it() {
        let mut b = make_bucket(16);
        let pos10 = key_of(10);
        let neg10 = key::negative_twin(&pos10);
        b.add_key(&pos10, &[1; 4]);
        b.add_key(&key_of(12), &[2; 4]);
        b.add_key(&neg10, &[3; 4]);
        b.add_key(&key_of(14), &[4; 4]);
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        let stats = b.sort(&mut scratch, &mut breather).unwrap();
        assert_eq!(stats.dup_collapsed, 1);
        assert_eq!(stats.neg_dropped, 0);
        assert_eq!(b.num_keys(), 3);
        assert!(key::is_negative(b.key_at(0)));
        assert_eq!(b.layout.payload_of(b.record_at(0)), &[3; 4]);
    }

    #[test]
    fn get_key_val_matches_either_polarity() {
        let mut b = make_bucket(16);
        let pos = key_of(7);
        b.add_key(&pos, &[9; 4]);
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        let neg = key::negative_twin(&pos);
        let (found_key, payload) = b.get_key_val(&neg).expect("masked lookup hits");
        assert_eq!(found_key, pos);
        assert_eq!(payload, &[9; 4]);
    }

    #[test]
    fn delete_list_removes_by_strict_key() {
        let mut b = make_bucket(16);
        for n in [1u32, 2, 3] {
            b.add_key(&key_of(n), &[0; 4]);
        }
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        let target = key_of(2);
        let removed = b.delete_list(std::iter::once(target.as_slice()));
        assert_eq!(removed, 1);
        assert_eq!(b.num_keys(), 2);
        assert!(b.get_key_val(&key_of(2)).is_none());
    }

    #[test]
    fn get_list_respects_byte_budget_but_always_emits_one() {
        let mut b = make_bucket(16);
        for n in [1u32, 2, 3, 4, 5] {
            b.add_key(&key_of(n), &[0; 4]);
        }
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        let mut out = RecordList::new();
        let appended = b
            .get_list(&mut out, &key_of(0), &key_of(100), 1, false, &mut breather)
            .unwrap();
        assert_eq!(appended, 1);
        assert!(!out.is_empty());
    }

    #[test]
    fn true_last_key_reflects_unsorted_tail() {
        let mut b = make_bucket(16);
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);

        b.add_key(&key_of(0x10), &[0; 4]);
        b.sort(&mut scratch, &mut breather).unwrap();
        assert_eq!(b.last_sorted_key(), Some(key_of(0x10)));
        assert_eq!(b.true_last_key(), Some(key_of(0x10)));

        // Appending to the tail without an intervening sort must still
        // move the true upper bound, even though `last_sorted_key` is
        // stale until the next `sort`.
        b.add_key(&key_of(0x12), &[0; 4]);
        assert_eq!(b.last_sorted_key(), Some(key_of(0x10)));
        assert_eq!(b.true_last_key(), Some(key_of(0x12)));
    }

    #[test]
    fn split_divides_roughly_in_half_without_tearing_masked_pairs() {
        let mut b = make_bucket(16);
        for n in 0..10u32 {
            b.add_key(&key_of(n), &[0; 4]);
        }
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        let mut upper = make_bucket(16);
        match b.split(&mut upper).unwrap() {
            SplitOutcome::Split => {}
            SplitOutcome::NonSplitting => panic!("expected a split"),
        }
        assert_eq!(b.num_keys() + upper.num_keys(), 10);
        assert!(b.num_keys() > 0 && upper.num_keys() > 0);
        let lo_last = b.last_sorted_key().unwrap();
        let hi_first = upper.first_key().unwrap();
        assert_eq!(key::strict_compare(&lo_last, &hi_first), Ordering::Less);
    }

    #[test]
    fn split_refuses_to_tear_a_masked_pair() {
        let mut b = make_bucket(4);
        let pos = key_of(5);
        let neg = key::negative_twin(&pos);
        // Two entries, MASKED-equal: no legal split point exists.
        b.add_key(&pos, &[0; 4]);
        b.add_key(&neg, &[0; 4]);
        let mut scratch = Vec::new();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        b.sort(&mut scratch, &mut breather).unwrap();
        assert_eq!(b.num_keys(), 2);
        let mut upper = make_bucket(4);
        match b.split(&mut upper).unwrap() {
            SplitOutcome::NonSplitting => {}
            SplitOutcome::Split => panic!("a 2-element masked-equal group must not split"),
        }
    }
}
