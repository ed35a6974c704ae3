//! # rdb-buckets
//!
//! The in-memory write buffer of a record database: a sorted sequence of
//! sorted micro-arrays (**Buckets**), grouped per collection into a
//! **BucketSet**, giving amortized O(1) insert, O(log N) point lookup, and
//! O(log N + k) range scan over fixed-width keyed records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      BucketStore                         │
//! │        RdbId -> BucketSet  (one per open database)       │
//! │  ┌──────────────────────────────────────────────────┐    │
//! │  │                    BucketSet                      │    │
//! │  │   directory: Vec<Bucket>, ordered by              │    │
//! │  │   (collnum, MASKED(firstKey))                     │    │
//! │  │                                                    │    │
//! │  │   ┌─────────┐  ┌─────────┐        ┌─────────┐     │    │
//! │  │   │ Bucket  │  │ Bucket  │  ...   │ Bucket  │     │    │
//! │  │   │ (leaf)  │  │ (leaf)  │        │ (leaf)  │     │    │
//! │  │   └─────────┘  └─────────┘        └─────────┘     │    │
//! │  │        split on overflow, append on tail insert    │    │
//! │  └──────────────────────────────────────────────────┘    │
//! │                                                            │
//! │   fastSave / fastLoad — atomic snapshot-to-disk           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`bucket`] | The leaf micro-array: sorted insert/lookup/split/merge |
//! | [`bucket_set`] | The per-collection directory, split routing, stats |
//! | [`store`] | `BucketStore`, the `RdbId -> BucketSet` coordinator |
//! | [`snapshot`] | `fastSave`/`fastLoad` atomic on-disk persistence |
//! | [`list`] | The byte-packed record list format for `get_list`/`add_list` |
//! | [`key`] | Key comparators (STRICT/MASKED) and the deletion-bit convention |
//! | [`record`] | Fixed-width record layout |
//! | [`alloc`] | Pluggable, tag-accounted bucket memory allocation |
//! | [`yield_hook`] | Cooperative yield points for long directory scans |
//! | [`encoding`] | Hand-rolled binary encode/decode for on-disk structures |
//!
//! ## Key Features
//!
//! - **Amortized O(1) insert** — sequential keys append to the newest
//!   bucket's unsorted tail; lookups and range scans sort lazily on demand.
//! - **Deletion-bit convention** — a tombstone is the "negative twin" of its
//!   key (bit 0 flipped), sorting adjacent to the live record it shadows.
//! - **Atomic snapshots** — `fastSave`/`fastLoad` write a CRC32-checked,
//!   magic/version-tagged image via a temp-file-then-rename, and read it
//!   back zero-copy via `memmap2`.
//! - **Cooperative yielding** — long directory scans breathe via a
//!   `Breather` stride counter instead of blocking a shared lock for the
//!   whole operation.
//! - **Pluggable allocation** — bucket storage goes through a
//!   `BucketAllocator` trait, tag-accounted the way the original threaded
//!   an `allocName` through every allocation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdb_buckets::alloc::SystemAllocator;
//! use rdb_buckets::bucket_set::BucketSetConfig;
//! use rdb_buckets::key::{CollNum, KeySize, RdbId};
//! use rdb_buckets::BucketStore;
//!
//! let store = BucketStore::new();
//! let config = BucketSetConfig {
//!     key_size: KeySize::Sixteen,
//!     fixed_data_size: 8,
//!     max_mem: 64 * 1024 * 1024,
//!     bucket_capacity: 1000,
//!     alloc_tag: "my_db".into(),
//!     rdb_id: RdbId(0),
//!     dbname: "my_db".into(),
//! };
//! let buckets = store.create(config, Box::new(SystemAllocator::new())).unwrap();
//!
//! let key = vec![0u8; 16];
//! buckets.add_node(CollNum(0), &key, &0u64.to_le_bytes()).unwrap();
//! assert!(buckets.get_key_val(CollNum(0), &key).unwrap().is_some());
//! ```

#![allow(dead_code)]

pub mod alloc;
pub mod bucket;
pub mod bucket_set;
pub mod encoding;
pub mod error;
pub mod key;
pub mod list;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod yield_hook;

pub use bucket_set::{BucketSetConfig, BucketSetStats};
pub use error::{BucketError, Result};
pub use key::{CollNum, KeySize, RdbId};
pub use store::BucketStore;
