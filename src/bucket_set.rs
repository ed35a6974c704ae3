//! # BucketSet Module
//!
//! ## Design Invariants
//!
//! - The directory is sorted by `(collnum, MASKED(firstKey))` (§3 inv. 1).
//! - For adjacent buckets of the same collection, the lower bucket's
//!   `endKey` strictly precedes the upper bucket's `firstKey` under STRICT
//!   order (§3 inv. 2) — buckets never overlap.
//! - `numKeysApprox` / `numNegKeys` are running estimates, exact only
//!   immediately after `clean_buckets()` (§4.2 "Stat coherence policy").
//! - At most one bucket per collection is non-full.
//!
//! ## Scratch buffers
//!
//! `sort_scratch` and `swap_scratch` are allocated once, sized to one
//! bucket's record region, and reused across every `sort`/`split` call —
//! no operation may hold them across a yield checkpoint (§5 "Shared
//! resources").

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::sync::RwLock;

use tracing::{debug, trace, warn};

use crate::alloc::BucketAllocator;
use crate::bucket::{Bucket, SplitOutcome};
use crate::error::{BucketError, Result};
use crate::key::{self, CollNum, KeySize, RdbId};
use crate::list::RecordList;
use crate::record::RecordLayout;
use crate::yield_hook::{Breather, NoopYieldHook, YieldOutcome};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Construction-time configuration for one [`BucketSet`], replacing the
/// original's positional `set(fixedDataSize, maxMem, allocName, rdbId,
/// dbname, keySize)` call.
#[derive(Debug, Clone)]
pub struct BucketSetConfig {
    pub key_size: KeySize,
    /// `0` means pure-key (no payload) records.
    pub fixed_data_size: usize,
    /// Soft ceiling on total resident record bytes.
    pub max_mem: usize,
    /// `B_MAX`: records per bucket. Default 1000 in the original.
    pub bucket_capacity: usize,
    pub alloc_tag: String,
    pub rdb_id: RdbId,
    pub dbname: String,
}

impl BucketSetConfig {
    fn validate(&self) -> Result<()> {
        if self.max_mem == 0 {
            return Err(BucketError::ConfigMismatch("max_mem must be non-zero".into()));
        }
        if self.bucket_capacity == 0 {
            return Err(BucketError::ConfigMismatch(
                "bucket_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.key_size, self.fixed_data_size)
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Running, possibly-overestimated statistics (§4.2 "Stat coherence
/// policy").
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketSetStats {
    /// Reserved capacity: sum of `bucket_capacity * rec_size` across every
    /// allocated bucket, regardless of occupancy. Compared against
    /// `max_mem` by `has_room`/`is_90_percent_full`/`get_mem_available`.
    pub mem_alloced: usize,
    /// Live bytes: sum of `rec_size` across every currently-stored record.
    /// Always `<= mem_alloced`.
    pub mem_occupied: usize,
    pub num_keys_approx: usize,
    pub num_neg_keys_approx: usize,
}

// ------------------------------------------------------------------------------------------------
// BucketSet core
// ------------------------------------------------------------------------------------------------

struct BucketSetInner {
    /// Directory, ordered by `(collnum, MASKED(firstKey))`.
    dir: Vec<Bucket>,
    stats: BucketSetStats,
    sort_scratch: Vec<u8>,
}

/// An ordered sequence of [`Bucket`]s for one RDB variant: the directory,
/// split routing, statistics, and save/load coordination (§4.2).
pub struct BucketSet {
    config: BucketSetConfig,
    alloc: Box<dyn BucketAllocator>,
    inner: RwLock<BucketSetInner>,
    writable: std::sync::atomic::AtomicBool,
    saving: std::sync::atomic::AtomicBool,
    dirty: std::sync::atomic::AtomicBool,
}

impl BucketSet {
    pub fn new(config: BucketSetConfig, alloc: Box<dyn BucketAllocator>) -> Result<Self> {
        config.validate()?;
        let rec_size = config.layout().rec_size();
        let sort_scratch = alloc
            .alloc(config.bucket_capacity * rec_size, &config.alloc_tag)
            .ok_or(BucketError::OutOfMemory)?;
        debug!(dbname = %config.dbname, rdb_id = %config.rdb_id, "constructed BucketSet");
        Ok(Self {
            config,
            alloc,
            inner: RwLock::new(BucketSetInner {
                dir: Vec::new(),
                stats: BucketSetStats::default(),
                sort_scratch,
            }),
            writable: std::sync::atomic::AtomicBool::new(true),
            saving: std::sync::atomic::AtomicBool::new(false),
            dirty: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BucketSetConfig {
        &self.config
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn disable_writes(&self) {
        self.writable.store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn enable_writes(&self) {
        self.writable.store(true, std::sync::atomic::Ordering::Release);
    }

    pub(crate) fn set_saving(&self, saving: bool) {
        self.saving.store(saving, std::sync::atomic::Ordering::Release);
    }

    /// Sets the needs-save flag (`setNeedsSave` in the original; §6
    /// Control). Public so callers outside this crate that mutate records
    /// through their own batching layer can still mark the set dirty.
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, std::sync::atomic::Ordering::Release);
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, BucketSetInner>> {
        self.inner
            .read()
            .map_err(|_| BucketError::Internal("BucketSet RwLock poisoned".into()))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BucketSetInner>> {
        self.inner
            .write()
            .map_err(|_| BucketError::Internal("BucketSet RwLock poisoned".into()))
    }

    // --------------------------------------------------------------------------------------------
    // Directory search
    // --------------------------------------------------------------------------------------------

    /// Three-way directory comparator (§4.2 "Directory search"): collection
    /// first, then MASKED position of `key` relative to a bucket's
    /// `[firstKey, endKey]` range.
    fn bucket_cmp(bucket: &Bucket, collnum: CollNum, key: &[u8]) -> Ordering {
        match bucket.collnum().cmp(&collnum) {
            Ordering::Equal => {}
            other => return other,
        }
        if let Some(first) = bucket.first_key() {
            if key::masked_compare(key, &first) == Ordering::Less {
                return Ordering::Greater; // bucket is "to the right"
            }
        }
        // Uses the true upper bound (prefix + unsorted tail), not just
        // `last_sorted_key`, so routing stays correct for records appended
        // to a bucket's tail since its last `sort`.
        if let Some(end) = bucket.true_last_key() {
            if key::masked_compare(key, &end) == Ordering::Greater {
                return Ordering::Less; // bucket is "to the left"
            }
        }
        Ordering::Equal
    }

    /// Finds the directory index of the bucket that owns `(collnum, key)`,
    /// or the index at which a new bucket for `(collnum, key)` should be
    /// inserted (the first bucket strictly greater, by directory order).
    fn locate(dir: &[Bucket], collnum: CollNum, key: &[u8]) -> Result<usize, usize> {
        dir.binary_search_by(|b| Self::bucket_cmp(b, collnum, key))
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Inserts one record, splitting the target bucket first if it is
    /// full (§4.2 `addNode`).
    pub fn add_node(&self, collnum: CollNum, key: &[u8], payload: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(BucketError::NotWritable);
        }
        let mut inner = self.lock_write()?;
        self.add_node_locked(&mut inner, collnum, key, payload)?;
        self.set_dirty(true);
        Ok(())
    }

    fn add_node_locked(
        &self,
        inner: &mut BucketSetInner,
        collnum: CollNum,
        key: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        let rec_size = self.config.layout().rec_size();
        let idx = match Self::locate(&inner.dir, collnum, key) {
            Ok(idx) => idx,
            // No bucket's range contains `key`. Per the directory search
            // rule, prefer appending to the last bucket strictly less than
            // `key` in this collection over growing the directory.
            Err(insert_at) if insert_at > 0 && inner.dir[insert_at - 1].collnum() == collnum => {
                insert_at - 1
            }
            Err(insert_at) => {
                trace!(collnum = %collnum, key = %crate::key::HexKey(key), "allocating new bucket");
                let bucket = Bucket::new(
                    self.config.layout(),
                    collnum,
                    self.config.bucket_capacity,
                    self.alloc.as_ref(),
                )?;
                inner.stats.mem_alloced += self.config.bucket_capacity * rec_size;
                inner.dir.insert(insert_at, bucket);
                insert_at
            }
        };

        if inner.dir[idx].is_full() {
            self.split_at_locked(inner, idx)?;
            return self.add_node_locked(inner, collnum, key, payload);
        }

        let bucket = &mut inner.dir[idx];
        if key::is_negative(key) {
            inner.stats.num_neg_keys_approx += 1;
        }
        if !bucket.add_key(key, payload) {
            return Err(BucketError::InvariantViolation(
                "add_key failed on a non-full bucket".into(),
            ));
        }
        inner.stats.num_keys_approx += 1;
        inner.stats.mem_occupied += rec_size;
        trace!(collnum = %collnum, key = %crate::key::HexKey(key), "inserted record");
        Ok(())
    }

    /// Iterates `list` in its native encoding, inserting each record via
    /// `add_node`. §4.2 suggests batching consecutive inserts into the
    /// same target bucket's tail without re-dispatching; we rely on
    /// `add_node`'s own locate-then-append path, which already only pays
    /// the directory search once per record (batching further would
    /// require a distinct tail-only fast path not exercised by the
    /// Non-goals' single-writer model).
    pub fn add_list(&self, collnum: CollNum, list: &RecordList) -> Result<usize> {
        let layout = self.config.layout();
        let mut count = 0usize;
        for (key, payload) in list.iter_records(&layout) {
            self.add_node(collnum, &key, &payload)?;
            count += 1;
        }
        Ok(count)
    }

    /// Splits a full bucket at directory index `idx` in place, inserting
    /// the new upper-half bucket immediately after it. Falls back to a
    /// non-splitting no-op (with a `warn!`) if no legal MASKED boundary
    /// exists — the caller's retried `add_node` will then observe the
    /// bucket as still full and surface `OutOfMemory` once the directory
    /// itself cannot grow either.
    fn split_at_locked(&self, inner: &mut BucketSetInner, idx: usize) -> Result<()> {
        let mut scratch = std::mem::take(&mut inner.sort_scratch);
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 64);
        inner.dir[idx].sort(&mut scratch, &mut breather)?;
        inner.sort_scratch = scratch;

        let collnum = inner.dir[idx].collnum();
        let rec_size = self.config.layout().rec_size();
        let mut upper = Bucket::new(
            self.config.layout(),
            collnum,
            self.config.bucket_capacity,
            self.alloc.as_ref(),
        )?;
        inner.stats.mem_alloced += self.config.bucket_capacity * rec_size;

        match inner.dir[idx].split(&mut upper)? {
            SplitOutcome::Split => {
                debug!(collnum = %collnum, at = idx, "split bucket");
                inner.dir.insert(idx + 1, upper);
                Ok(())
            }
            SplitOutcome::NonSplitting => {
                warn!(collnum = %collnum, at = idx, "split fell back to non-splitting: all keys MASKED-equal");
                // `upper` was allocated but never inserted into the
                // directory; release its reservation back immediately.
                inner.stats.mem_alloced = inner
                    .stats
                    .mem_alloced
                    .saturating_sub(self.config.bucket_capacity * rec_size);
                self.alloc
                    .free(self.config.bucket_capacity * rec_size, crate::bucket::ALLOC_TAG);
                Ok(())
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// MASKED point lookup. Returns the stored key (which may carry
    /// either polarity of the deletion bit) and payload.
    pub fn get_key_val(&self, collnum: CollNum, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut inner = self.lock_write()?;
        let idx = match Self::locate(&inner.dir, collnum, key) {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        if !inner.dir[idx].is_sorted() {
            let mut scratch = std::mem::take(&mut inner.sort_scratch);
            let hook = NoopYieldHook;
            let mut breather = Breather::new(&hook, 0, 64);
            inner.dir[idx].sort(&mut scratch, &mut breather)?;
            inner.sort_scratch = scratch;
        }
        Ok(inner.dir[idx]
            .get_key_val(key)
            .map(|(k, v)| (k.to_vec(), v.to_vec())))
    }

    /// Accumulates every record in `[start_key, end_key]` across every
    /// bucket of `collnum` overlapping that range, in ascending order,
    /// honoring a cooperative yield hook between buckets (§5 "Suspension
    /// points").
    pub fn get_list(
        &self,
        collnum: CollNum,
        start_key: &[u8],
        end_key: &[u8],
        min_rec_sizes: usize,
        use_half_keys: bool,
        breather: &mut Breather<'_>,
    ) -> Result<RecordList> {
        let mut inner = self.lock_write()?;
        let mut out = RecordList::new();

        let start_idx = match Self::locate(&inner.dir, collnum, start_key) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };

        let mut idx = start_idx;
        while idx < inner.dir.len() && inner.dir[idx].collnum() == collnum {
            if !inner.dir[idx].is_sorted() {
                let mut scratch = std::mem::take(&mut inner.sort_scratch);
                inner.dir[idx].sort(&mut scratch, breather)?;
                inner.sort_scratch = scratch;
            }
            let Some(first) = inner.dir[idx].first_key() else {
                idx += 1;
                continue;
            };
            if key::strict_compare(&first, end_key) == Ordering::Greater {
                break;
            }
            inner.dir[idx].get_list(&mut out, start_key, end_key, min_rec_sizes, use_half_keys, breather)?;
            if out.byte_len() >= min_rec_sizes {
                break;
            }
            idx += 1;
            if breather.breathe() == YieldOutcome::Cancel {
                return Err(BucketError::Cancelled);
            }
        }
        Ok(out)
    }

    /// Approximate byte size of `[start_key, end_key]`: average record
    /// size times the approximate key count in overlapping buckets. Cheap,
    /// bucket-boundary precision (§9 second Open Question).
    pub fn get_list_size(&self, collnum: CollNum, start_key: &[u8], end_key: &[u8]) -> Result<usize> {
        let inner = self.lock_read()?;
        let rec_size = self.config.layout().rec_size();
        let mut n = 0usize;
        for bucket in &inner.dir {
            if bucket.collnum() != collnum {
                continue;
            }
            let Some(first) = bucket.first_key() else {
                continue;
            };
            if key::strict_compare(&first, end_key) == Ordering::Greater {
                continue;
            }
            if let Some(last) = bucket.last_sorted_key() {
                if key::strict_compare(&last, start_key) == Ordering::Less {
                    continue;
                }
            }
            n += bucket.num_keys();
        }
        Ok(n * rec_size)
    }

    /// Exact byte size of `[start_key, end_key]`, via a real walk
    /// (`getListSizeExact` in the original).
    pub fn get_list_size_exact(&self, collnum: CollNum, start_key: &[u8], end_key: &[u8]) -> Result<usize> {
        let mut inner = self.lock_write()?;
        let start_idx = match Self::locate(&inner.dir, collnum, start_key) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        let mut total = 0usize;
        let mut idx = start_idx;
        while idx < inner.dir.len() && inner.dir[idx].collnum() == collnum {
            if !inner.dir[idx].is_sorted() {
                let mut scratch = std::mem::take(&mut inner.sort_scratch);
                let hook = NoopYieldHook;
                let mut breather = Breather::new(&hook, 0, 64);
                inner.dir[idx].sort(&mut scratch, &mut breather)?;
                inner.sort_scratch = scratch;
            }
            let layout = *inner.dir[idx].layout();
            for i in 0..inner.dir[idx].num_keys() {
                let key = inner.dir[idx].key_at_index(i);
                if key::masked_compare(key, start_key) == Ordering::Less {
                    continue;
                }
                if key::strict_compare(key, end_key) == Ordering::Greater {
                    break;
                }
                total += layout.rec_size();
            }
            idx += 1;
        }
        Ok(total)
    }

    /// Removes every record in `list` from its owning bucket (§4.2
    /// `deleteList`).
    pub fn delete_list(&self, collnum: CollNum, list: &RecordList) -> Result<usize> {
        let layout = self.config.layout();
        let mut inner = self.lock_write()?;
        let mut removed = 0usize;
        for key in list.iter_keys(&layout) {
            let idx = match Self::locate(&inner.dir, collnum, &key) {
                Ok(idx) => idx,
                Err(_) => continue,
            };
            if !inner.dir[idx].is_sorted() {
                let mut scratch = std::mem::take(&mut inner.sort_scratch);
                let hook = NoopYieldHook;
                let mut breather = Breather::new(&hook, 0, 64);
                inner.dir[idx].sort(&mut scratch, &mut breather)?;
                inner.sort_scratch = scratch;
            }
            let n = inner.dir[idx].delete_list(std::iter::once(key.as_slice()));
            if n > 0 {
                removed += n;
                inner.stats.num_keys_approx = inner.stats.num_keys_approx.saturating_sub(n);
                inner.stats.mem_occupied = inner
                    .stats
                    .mem_occupied
                    .saturating_sub(n * layout.rec_size());
            }
        }
        if removed > 0 {
            self.set_dirty(true);
        }
        Ok(removed)
    }

    /// Removes every bucket belonging to `collnum` (§4.2 `delColl`),
    /// freeing each dropped bucket's reservation via the allocator.
    pub fn del_coll(&self, collnum: CollNum) -> Result<()> {
        let mut inner = self.lock_write()?;
        let rec_size = self.config.layout().rec_size();
        let before = inner.dir.len();
        let mut removed_keys = 0usize;
        let mut freed_capacity = 0usize;
        let mut kept = Vec::with_capacity(inner.dir.len());
        for bucket in inner.dir.drain(..) {
            if bucket.collnum() == collnum {
                removed_keys += bucket.num_keys();
                let bytes = bucket.capacity() * rec_size;
                freed_capacity += bytes;
                self.alloc.free(bytes, crate::bucket::ALLOC_TAG);
            } else {
                kept.push(bucket);
            }
        }
        inner.dir = kept;
        if inner.dir.len() != before {
            inner.stats.num_keys_approx = inner.stats.num_keys_approx.saturating_sub(removed_keys);
            inner.stats.mem_occupied = inner
                .stats
                .mem_occupied
                .saturating_sub(removed_keys * rec_size);
            inner.stats.mem_alloced = inner.stats.mem_alloced.saturating_sub(freed_capacity);
            self.set_dirty(true);
            debug!(collnum = %collnum, "dropped collection");
        }
        Ok(())
    }

    pub fn coll_exists(&self, collnum: CollNum) -> Result<bool> {
        let inner = self.lock_read()?;
        Ok(inner.dir.iter().any(|b| b.collnum() == collnum))
    }

    /// Exact key count for one collection, by a directory scan (not a
    /// full record scan).
    pub fn get_num_keys(&self, collnum: CollNum) -> Result<usize> {
        let inner = self.lock_read()?;
        Ok(inner
            .dir
            .iter()
            .filter(|b| b.collnum() == collnum)
            .map(|b| b.num_keys())
            .sum())
    }

    /// Exact negative-key count, by a full per-bucket scan (vs. the
    /// approximate `stats().num_neg_keys_approx`).
    pub fn get_num_negative_keys(&self) -> Result<usize> {
        let inner = self.lock_read()?;
        Ok(inner.dir.iter().map(|b| b.num_negative_keys_exact()).sum())
    }

    pub fn get_num_positive_keys(&self) -> Result<usize> {
        let inner = self.lock_read()?;
        Ok(inner.dir.iter().map(|b| b.num_positive_keys_exact()).sum())
    }

    pub fn stats(&self) -> Result<BucketSetStats> {
        Ok(self.lock_read()?.stats)
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Sorts every bucket with a non-empty tail; invoked before save and
    /// periodically. Breathes between buckets.
    pub fn clean_buckets(&self, breather: &mut Breather<'_>) -> Result<()> {
        let mut inner = self.lock_write()?;
        let mut collapsed_total = 0usize;
        let mut neg_dropped_total = 0usize;
        let rec_size = self.config.layout().rec_size();
        for i in 0..inner.dir.len() {
            if inner.dir[i].is_sorted() {
                continue;
            }
            let mut scratch = std::mem::take(&mut inner.sort_scratch);
            let result = inner.dir[i].sort(&mut scratch, breather);
            inner.sort_scratch = scratch;
            let stats = match result {
                Ok(stats) => stats,
                Err(e) => {
                    inner.stats.num_keys_approx = inner.stats.num_keys_approx.saturating_sub(collapsed_total);
                    inner.stats.num_neg_keys_approx =
                        inner.stats.num_neg_keys_approx.saturating_sub(neg_dropped_total);
                    inner.stats.mem_occupied =
                        inner.stats.mem_occupied.saturating_sub(collapsed_total * rec_size);
                    return Err(e);
                }
            };
            collapsed_total += stats.dup_collapsed;
            neg_dropped_total += stats.neg_dropped;
            if breather.breathe() == YieldOutcome::Cancel {
                inner.stats.num_keys_approx = inner.stats.num_keys_approx.saturating_sub(collapsed_total);
                inner.stats.num_neg_keys_approx =
                    inner.stats.num_neg_keys_approx.saturating_sub(neg_dropped_total);
                inner.stats.mem_occupied =
                    inner.stats.mem_occupied.saturating_sub(collapsed_total * rec_size);
                return Err(BucketError::Cancelled);
            }
        }
        inner.stats.num_keys_approx = inner.stats.num_keys_approx.saturating_sub(collapsed_total);
        inner.stats.num_neg_keys_approx = inner.stats.num_neg_keys_approx.saturating_sub(neg_dropped_total);
        inner.stats.mem_occupied = inner.stats.mem_occupied.saturating_sub(collapsed_total * rec_size);
        Ok(())
    }

    pub fn has_room(&self, n: usize) -> Result<bool> {
        let inner = self.lock_read()?;
        Ok(inner.stats.mem_alloced + n * self.config.layout().rec_size() <= self.config.max_mem)
    }

    /// Remaining allocation budget before `max_mem` (§6 Introspection
    /// `getMemAvailable`).
    pub fn get_mem_available(&self) -> Result<usize> {
        let inner = self.lock_read()?;
        Ok(self.config.max_mem.saturating_sub(inner.stats.mem_alloced))
    }

    /// Accounts for `numKeysApprox` overestimation with a 10% margin
    /// (§4.2 "Stat coherence policy").
    pub fn is_90_percent_full(&self) -> Result<bool> {
        let inner = self.lock_read()?;
        Ok((inner.stats.mem_alloced as f64) >= 0.9 * (self.config.max_mem as f64))
    }

    pub fn needs_dump(&self) -> Result<bool> {
        Ok(self.is_dirty() && self.is_90_percent_full()?)
    }

    /// Directory pre-growth hint (`resizeTable` in the original).
    pub fn reserve(&self, additional_buckets: usize) -> Result<()> {
        let mut inner = self.lock_write()?;
        inner.dir.reserve(additional_buckets);
        Ok(())
    }

    /// Re-validates every bucket's internal invariants plus the directory
    /// ordering/non-overlap invariants (§3 BucketSet inv. 1, 2).
    pub fn self_test(&self) -> Result<()> {
        let inner = self.lock_read()?;
        for bucket in &inner.dir {
            bucket.self_test()?;
        }
        for w in inner.dir.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            if a.collnum() != b.collnum() {
                continue;
            }
            let (Some(a_end), Some(b_first)) = (a.true_last_key(), b.first_key()) else {
                continue;
            };
            if key::strict_compare(&a_end, &b_first) != Ordering::Less {
                return Err(BucketError::InvariantViolation(
                    "adjacent buckets of the same collection overlap".into(),
                ));
            }
        }
        Ok(())
    }

    /// Release-mode fallback for a failed `self_test`: re-sorts every
    /// bucket and rebuilds the approximate counters from scratch.
    pub fn repair(&self) -> Result<()> {
        warn!(dbname = %self.config.dbname, "repair engaged");
        let mut inner = self.lock_write()?;
        for i in 0..inner.dir.len() {
            let mut scratch = std::mem::take(&mut inner.sort_scratch);
            let hook = NoopYieldHook;
            let mut breather = Breather::new(&hook, 0, 64);
            inner.dir[i].sort(&mut scratch, &mut breather)?;
            inner.sort_scratch = scratch;
        }
        let rec_size = self.config.layout().rec_size();
        let mut num_keys = 0usize;
        let mut num_neg = 0usize;
        let mut mem_alloced = 0usize;
        for bucket in &inner.dir {
            num_keys += bucket.num_keys();
            num_neg += bucket.num_negative_keys_exact();
            mem_alloced += bucket.capacity() * rec_size;
        }
        inner.stats.num_keys_approx = num_keys;
        inner.stats.num_neg_keys_approx = num_neg;
        inner.stats.mem_alloced = mem_alloced;
        inner.stats.mem_occupied = num_keys * rec_size;
        Ok(())
    }

    /// Debug dump (`printBuckets` in the original — implemented as a
    /// string builder, not a print-to-stdout).
    pub fn debug_dump(&self) -> Result<String> {
        let inner = self.lock_read()?;
        let mut out = String::new();
        for (i, bucket) in inner.dir.iter().enumerate() {
            out.push_str(&format!(
                "[{i}] coll={} keys={} sorted={}\n",
                bucket.collnum(),
                bucket.num_keys(),
                bucket.is_sorted(),
            ));
        }
        Ok(out)
    }

    // --------------------------------------------------------------------------------------------
    // Snapshot support (used by `crate::snapshot`)
    // --------------------------------------------------------------------------------------------

    pub(crate) fn directory_snapshot(&self) -> Result<Vec<(CollNum, usize, Vec<u8>)>> {
        let inner = self.lock_read()?;
        Ok(inner
            .dir
            .iter()
            .map(|b| (b.collnum(), b.num_keys(), b.raw_records().to_vec()))
            .collect())
    }

    pub(crate) fn restore_directory(&self, entries: Vec<(CollNum, Vec<u8>)>) -> Result<()> {
        let mut inner = self.lock_write()?;
        let layout = self.config.layout();
        let rec_size = layout.rec_size();
        let mut dir = Vec::with_capacity(entries.len());
        let mut num_keys = 0usize;
        let mut mem_alloced = 0usize;
        for (collnum, raw) in entries {
            let bucket = Bucket::from_raw_records(
                layout,
                collnum,
                self.config.bucket_capacity,
                &raw,
                self.alloc.as_ref(),
            )?;
            num_keys += bucket.num_keys();
            mem_alloced += bucket.capacity() * rec_size;
            dir.push(bucket);
        }
        // Loading replaces the whole directory; free whatever buckets were
        // resident before this load so the allocator's accounting doesn't
        // leak the discarded buffers.
        for old in inner.dir.drain(..) {
            self.alloc.free(old.capacity() * rec_size, crate::bucket::ALLOC_TAG);
        }
        inner.dir = dir;
        inner.stats.num_keys_approx = num_keys;
        inner.stats.mem_alloced = mem_alloced;
        inner.stats.mem_occupied = num_keys * rec_size;
        self.set_dirty(false);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;
    use crate::key::KeySize;
    use crate::yield_hook::NoopYieldHook;

    fn key12(hi_byte: u8) -> Vec<u8> {
        let mut k = vec![0u8; 12];
        k[11] = hi_byte;
        k
    }

    fn small_set(bucket_capacity: usize) -> BucketSet {
        let config = BucketSetConfig {
            key_size: KeySize::Twelve,
            fixed_data_size: 0,
            max_mem: 1 << 20,
            bucket_capacity,
            alloc_tag: "test".into(),
            rdb_id: RdbId(0),
            dbname: "test".into(),
        };
        BucketSet::new(config, Box::new(SystemAllocator::new())).unwrap()
    }

    fn get_list(set: &BucketSet, coll: CollNum, start: &[u8], end: &[u8]) -> RecordList {
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        set.get_list(coll, start, end, usize::MAX, false, &mut breather)
            .unwrap()
    }

    // S1: single insert / lookup, MASKED twin also matches.
    #[test]
    fn s1_single_insert_lookup() {
        let set = small_set(4);
        let c0 = CollNum(0);
        let pos = key12(0x10);
        set.add_node(c0, &pos, &[]).unwrap();

        assert!(set.get_key_val(c0, &pos).unwrap().is_some());
        let neg = key::negative_twin(&pos);
        assert!(set.get_key_val(c0, &neg).unwrap().is_some());
        assert_eq!(set.get_num_keys(c0).unwrap(), 1);
        assert_eq!(set.get_num_negative_keys().unwrap(), 0);
    }

    // A second insert into the same bucket's tail, with no intervening
    // sort/clean_buckets, must be visible to a lookup immediately: the
    // directory comparator must not trust a stale `last_sorted_key` as the
    // bucket's upper bound.
    #[test]
    fn add_node_into_tail_is_visible_without_intervening_sort() {
        let set = small_set(4);
        let c0 = CollNum(0);
        let first = key12(0x10);
        set.add_node(c0, &first, &[]).unwrap();
        // Force a sort of the lone bucket so `last_sorted_key` is pinned
        // at 0x10 before the next insert lands in the tail.
        assert!(set.get_key_val(c0, &first).unwrap().is_some());

        let second = key12(0x12);
        set.add_node(c0, &second, &[]).unwrap();
        assert!(
            set.get_key_val(c0, &second).unwrap().is_some(),
            "tail-appended record must be visible to an immediate lookup"
        );

        let list = get_list(&set, c0, &key12(0x00), &key12(0xff));
        let layout = set.config().layout();
        let keys: Vec<u8> = list.iter_keys(&layout).map(|k| k[11]).collect();
        assert_eq!(keys, vec![0x10, 0x12]);
    }

    // S2: dedup on sort keeps the negative twin.
    #[test]
    fn s2_dedup_on_sort() {
        let set = small_set(8);
        let c0 = CollNum(0);
        let pos10 = key12(0x10);
        set.add_node(c0, &pos10, &[]).unwrap();
        set.add_node(c0, &key12(0x12), &[]).unwrap();
        set.add_node(c0, &key::negative_twin(&pos10), &[]).unwrap();
        set.add_node(c0, &key12(0x14), &[]).unwrap();

        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 1);
        set.clean_buckets(&mut breather).unwrap();

        assert_eq!(set.get_num_keys(c0).unwrap(), 3);
        assert_eq!(set.get_num_negative_keys().unwrap(), 1);
        let list = get_list(&set, c0, &key12(0x00), &key12(0xff));
        let layout = set.config().layout();
        let keys: Vec<u8> = list.iter_keys(&layout).map(|k| k[11]).collect();
        assert_eq!(keys, vec![0x11, 0x12, 0x14]);
    }

    // S3: split on overflow; every invariant holds afterward.
    #[test]
    fn s3_split_on_overflow() {
        let set = small_set(4);
        let c0 = CollNum(0);
        for hi in [0x10, 0x20, 0x30, 0x40, 0x25] {
            set.add_node(c0, &key12(hi), &[]).unwrap();
        }
        set.self_test().unwrap();
        let list = get_list(&set, c0, &key12(0x00), &key12(0xff));
        let layout = set.config().layout();
        let keys: Vec<u8> = list.iter_keys(&layout).map(|k| k[11]).collect();
        assert_eq!(keys, vec![0x10, 0x20, 0x25, 0x30, 0x40]);
    }

    // S4: ranged read spanning the post-split bucket boundary.
    #[test]
    fn s4_ranged_read_across_buckets() {
        let set = small_set(4);
        let c0 = CollNum(0);
        for hi in [0x10, 0x20, 0x30, 0x40, 0x25] {
            set.add_node(c0, &key12(hi), &[]).unwrap();
        }
        let list = get_list(&set, c0, &key12(0x15), &key12(0x35));
        let layout = set.config().layout();
        let keys: Vec<u8> = list.iter_keys(&layout).map(|k| k[11]).collect();
        assert_eq!(keys, vec![0x20, 0x25, 0x30]);
    }

    // S5: collection isolation; delColl(c0) leaves c1 intact.
    #[test]
    fn s5_collection_isolation() {
        let set = small_set(4);
        let c0 = CollNum(0);
        let c1 = CollNum(1);
        let k = key12(0x10);
        set.add_node(c0, &k, &[]).unwrap();
        set.add_node(c1, &k, &[]).unwrap();

        set.del_coll(c0).unwrap();
        assert!(!set.coll_exists(c0).unwrap());
        assert!(set.coll_exists(c1).unwrap());
        assert!(set.get_key_val(c1, &k).unwrap().is_some());
    }

    #[test]
    fn not_writable_rejects_add_node() {
        let set = small_set(4);
        set.disable_writes();
        let err = set.add_node(CollNum(0), &key12(0x10), &[]).unwrap_err();
        assert!(matches!(err, BucketError::NotWritable));
    }

    #[test]
    fn delete_list_removes_records() {
        let set = small_set(8);
        let c0 = CollNum(0);
        for hi in [0x10, 0x20, 0x30] {
            set.add_node(c0, &key12(hi), &[]).unwrap();
        }
        let layout = set.config().layout();
        let mut list = RecordList::new();
        list.push_record(&layout, &key12(0x20), &[], None, false);
        let removed = set.delete_list(c0, &list).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(set.get_num_keys(c0).unwrap(), 2);
    }
}

// ------------------------------------------------------------------------------------------------
// Stress tests: large mixed-operation workloads checked against a HashMap
// oracle. Deterministic pseudo-random sequences (simple LCG), so failures
// are reproducible without an external RNG dependency.
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
#[allow(non_snake_case)]
mod stress_tests {
    use super::*;
    use crate::alloc::SystemAllocator;
    use crate::key::KeySize;
    use crate::yield_hook::NoopYieldHook;
    use std::collections::HashMap;

    struct Rng(u64);

    impl Rng {
        fn new(seed: u64) -> Self {
            Self(seed)
        }

        fn next_u64(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0
        }

        fn next_usize(&mut self, bound: usize) -> usize {
            (self.next_u64() % bound as u64) as usize
        }
    }

    fn key16(n: u64) -> Vec<u8> {
        let mut k = vec![0u8; 16];
        k[8..16].copy_from_slice(&n.to_le_bytes());
        k
    }

    fn stress_set(bucket_capacity: usize) -> BucketSet {
        let config = BucketSetConfig {
            key_size: KeySize::Sixteen,
            fixed_data_size: 8,
            max_mem: 64 << 20,
            bucket_capacity,
            alloc_tag: "stress".into(),
            rdb_id: RdbId(0),
            dbname: "stress".into(),
        };
        BucketSet::new(config, Box::new(SystemAllocator::new())).unwrap()
    }

    fn verify_all(set: &BucketSet, coll: CollNum, expected: &HashMap<u64, Option<u64>>) {
        for (&k, &expected_v) in expected {
            let actual = set
                .get_key_val(coll, &key16(k))
                .unwrap()
                .map(|(_, v)| u64::from_le_bytes(v.try_into().unwrap()));
            assert_eq!(actual, expected_v, "mismatch for key {k}");
        }
    }

    // 1. Heavy mixed insert/delete churn on one collection, ~4000 ops on
    // 400 keys, verified key-by-key against a HashMap oracle.
    #[test]
    #[ignore] // Slow. Run with: cargo test -- --ignored
    fn heavy_mixed_churn_matches_oracle() {
        let set = stress_set(16);
        let coll = CollNum(0);
        let mut expected: HashMap<u64, Option<u64>> = HashMap::new();
        let mut rng = Rng::new(42);

        let num_keys = 400u64;
        let num_ops = 4000;

        for round in 0..num_ops {
            let idx = rng.next_usize(num_keys as usize) as u64;
            let op = rng.next_usize(100);

            if op < 70 {
                let val = round as u64;
                set.add_node(coll, &key16(idx), &val.to_le_bytes()).unwrap();
                expected.insert(idx, Some(val));
            } else {
                let neg = key::negative_twin(&key16(idx));
                set.add_node(coll, &neg, &0u64.to_le_bytes()).unwrap();
                expected.insert(idx, None);
            }
        }

        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 64);
        set.clean_buckets(&mut breather).unwrap();
        set.self_test().unwrap();
        verify_all(&set, coll, &expected);
    }

    // 2. Scan order is preserved across heavy churn and repeated splits.
    #[test]
    #[ignore] // Slow. Run with: cargo test -- --ignored
    fn scan_stays_sorted_under_churn() {
        let set = stress_set(8);
        let coll = CollNum(0);
        let mut rng = Rng::new(0xDEAD);

        for _ in 0..3000 {
            let idx = rng.next_usize(2000) as u64;
            set.add_node(coll, &key16(idx), &idx.to_le_bytes()).unwrap();
        }

        set.self_test().unwrap();
        let hook = NoopYieldHook;
        let mut breather = Breather::new(&hook, 0, 64);
        let list = set
            .get_list(coll, &key16(0), &key16(u64::MAX), usize::MAX, false, &mut breather)
            .unwrap();
        let layout = set.config().layout();
        let mut prev: Option<Vec<u8>> = None;
        for k in list.iter_keys(&layout) {
            if let Some(p) = &prev {
                assert_eq!(key::strict_compare(p, &k), std::cmp::Ordering::Less);
            }
            prev = Some(k);
        }
    }

    // 3. Many collections interleaved; isolation holds after heavy churn.
    #[test]
    #[ignore] // Slow. Run with: cargo test -- --ignored
    fn collection_isolation_under_churn() {
        let set = stress_set(8);
        let mut rng = Rng::new(0xBEEF);
        let num_colls = 10i32;

        for _ in 0..3000 {
            let coll = CollNum(rng.next_usize(num_colls as usize) as i32);
            let idx = rng.next_usize(200) as u64;
            set.add_node(coll, &key16(idx), &idx.to_le_bytes()).unwrap();
        }

        set.self_test().unwrap();
        for c in 0..num_colls {
            for other in 0..num_colls {
                if c == other {
                    continue;
                }
                assert!(set.coll_exists(CollNum(c)).unwrap());
                assert!(set.coll_exists(CollNum(other)).unwrap());
            }
        }
        let total: usize = (0..num_colls)
            .map(|c| set.get_num_keys(CollNum(c)).unwrap())
            .sum();
        assert!(total > 0);
    }
}
