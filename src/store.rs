//! # BucketStore
//!
//! Coordinator replacing the original's sentinel-head collection-chain
//! pattern (§9 "Global state" design note): rather than a linked list of
//! `BucketSet`s sharing a head's `writable`/`saving` flags, this owns a
//! `RdbId -> BucketSet` map, and each `BucketSet` carries its own flags
//! directly (see `bucket_set.rs`).
//!
//! Mirrors `engine::Engine`'s shape: a small `Arc`-friendly handle over
//! shared state behind a single lock, exposing the crate's public surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::alloc::BucketAllocator;
use crate::bucket_set::{BucketSet, BucketSetConfig};
use crate::error::{BucketError, Result};
use crate::key::RdbId;
use crate::snapshot;
use crate::yield_hook::YieldHook;

/// Owns every [`BucketSet`] in the process, keyed by [`RdbId`].
///
/// Cloning a `BucketStore` is cheap and shares the underlying map (same
/// `Arc<RwLock<_>>` pattern as `Engine`).
pub struct BucketStore {
    sets: Arc<RwLock<HashMap<RdbId, Arc<BucketSet>>>>,
}

impl Clone for BucketStore {
    fn clone(&self) -> Self {
        Self {
            sets: Arc::clone(&self.sets),
        }
    }
}

impl Default for BucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketStore {
    pub fn new() -> Self {
        Self {
            sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RdbId, Arc<BucketSet>>>> {
        self.sets
            .read()
            .map_err(|_| BucketError::Internal("BucketStore RwLock poisoned".into()))
    }

    fn lock_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RdbId, Arc<BucketSet>>>> {
        self.sets
            .write()
            .map_err(|_| BucketError::Internal("BucketStore RwLock poisoned".into()))
    }

    /// Creates and registers a fresh [`BucketSet`] for `config.rdb_id`.
    /// Fails with [`BucketError::ConfigMismatch`] if that `rdb_id` is
    /// already registered.
    pub fn create(
        &self,
        config: BucketSetConfig,
        alloc: Box<dyn BucketAllocator>,
    ) -> Result<Arc<BucketSet>> {
        let rdb_id = config.rdb_id;
        let mut sets = self.lock_write()?;
        if sets.contains_key(&rdb_id) {
            return Err(BucketError::ConfigMismatch(format!(
                "{rdb_id} is already registered"
            )));
        }
        let bucket_set = Arc::new(BucketSet::new(config, alloc)?);
        info!(%rdb_id, "registered new bucket set");
        sets.insert(rdb_id, bucket_set.clone());
        Ok(bucket_set)
    }

    /// Loads a [`BucketSet`] from a snapshot file and registers it under
    /// `config.rdb_id`, replacing any existing entry for that id.
    pub fn load(
        &self,
        path: impl AsRef<Path>,
        config: BucketSetConfig,
        alloc: Box<dyn BucketAllocator>,
    ) -> Result<Arc<BucketSet>> {
        let rdb_id = config.rdb_id;
        let bucket_set = Arc::new(snapshot::fast_load(path, config, alloc)?);
        let mut sets = self.lock_write()?;
        sets.insert(rdb_id, bucket_set.clone());
        info!(%rdb_id, "loaded bucket set from snapshot");
        Ok(bucket_set)
    }

    /// Snapshots the `rdb_id` bucket set to `path` (§4.3 `fastSave`). See
    /// [`snapshot::fast_save`] for the exact protocol.
    pub fn save(
        &self,
        rdb_id: RdbId,
        path: impl AsRef<Path>,
        use_thread: bool,
        hook: &dyn YieldHook,
        callback: impl FnOnce(Result<std::path::PathBuf>) + Send + 'static,
    ) -> Result<()> {
        let bucket_set = self.get(rdb_id)?;
        snapshot::fast_save(bucket_set, path, use_thread, hook, callback)
    }

    /// Returns the [`BucketSet`] registered under `rdb_id`, or
    /// [`BucketError::ConfigMismatch`] if none exists.
    pub fn get(&self, rdb_id: RdbId) -> Result<Arc<BucketSet>> {
        self.lock_read()?
            .get(&rdb_id)
            .cloned()
            .ok_or_else(|| BucketError::ConfigMismatch(format!("{rdb_id} is not registered")))
    }

    /// Removes and returns the [`BucketSet`] registered under `rdb_id`, if
    /// any.
    pub fn remove(&self, rdb_id: RdbId) -> Result<Option<Arc<BucketSet>>> {
        Ok(self.lock_write()?.remove(&rdb_id))
    }

    /// Lists every currently-registered [`RdbId`].
    pub fn rdb_ids(&self) -> Result<Vec<RdbId>> {
        Ok(self.lock_read()?.keys().copied().collect())
    }

    /// Calls [`BucketSet::disable_writes`] on every registered set.
    pub fn disable_all_writes(&self) -> Result<()> {
        for bucket_set in self.lock_read()?.values() {
            bucket_set.disable_writes();
        }
        Ok(())
    }

    /// Calls [`BucketSet::enable_writes`] on every registered set.
    pub fn enable_all_writes(&self) -> Result<()> {
        for bucket_set in self.lock_read()?.values() {
            bucket_set.enable_writes();
        }
        Ok(())
    }

    /// Runs [`BucketSet::self_test`] over every registered set, returning
    /// the first failure encountered (if any) together with its
    /// [`RdbId`].
    pub fn self_test(&self) -> Result<()> {
        for (rdb_id, bucket_set) in self.lock_read()?.iter() {
            if let Err(e) = bucket_set.self_test() {
                warn!(%rdb_id, error = %e, "bucket set failed self_test");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;
    use crate::key::{CollNum, KeySize};
    use crate::yield_hook::NoopYieldHook;

    fn config(rdb_id: RdbId) -> BucketSetConfig {
        BucketSetConfig {
            key_size: KeySize::Twelve,
            fixed_data_size: 4,
            max_mem: 1024 * 1024,
            bucket_capacity: 4,
            alloc_tag: "store.test".into(),
            rdb_id,
            dbname: "store-test".into(),
        }
    }

    fn key12(b: u8) -> Vec<u8> {
        let mut k = vec![0u8; 12];
        k[11] = b;
        k
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = BucketStore::new();
        let bs = store
            .create(config(RdbId(0)), Box::new(SystemAllocator::new()))
            .expect("create");
        bs.add_node(CollNum(0), &key12(0x10), &[1, 2, 3, 4])
            .unwrap();

        let fetched = store.get(RdbId(0)).expect("get");
        assert_eq!(fetched.get_num_keys(CollNum(0)).unwrap(), 1);
    }

    #[test]
    fn duplicate_rdb_id_rejected() {
        let store = BucketStore::new();
        store
            .create(config(RdbId(5)), Box::new(SystemAllocator::new()))
            .expect("first create");
        let err = store
            .create(config(RdbId(5)), Box::new(SystemAllocator::new()))
            .unwrap_err();
        assert!(matches!(err, BucketError::ConfigMismatch(_)));
    }

    #[test]
    fn multiple_rdb_ids_are_isolated() {
        let store = BucketStore::new();
        let a = store
            .create(config(RdbId(1)), Box::new(SystemAllocator::new()))
            .unwrap();
        let b = store
            .create(config(RdbId(2)), Box::new(SystemAllocator::new()))
            .unwrap();
        a.add_node(CollNum(0), &key12(0x10), &[0, 0, 0, 0]).unwrap();
        assert_eq!(b.get_num_keys(CollNum(0)).unwrap(), 0);
        assert_eq!(store.rdb_ids().unwrap().len(), 2);
    }

    #[test]
    fn save_and_load_round_trip_through_store() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let path = tmp.path().join("rdb0.snap");

        let store = BucketStore::new();
        let bs = store
            .create(config(RdbId(0)), Box::new(SystemAllocator::new()))
            .unwrap();
        bs.add_node(CollNum(0), &key12(0x10), &[1, 2, 3, 4])
            .unwrap();

        let hook = NoopYieldHook;
        store
            .save(RdbId(0), &path, false, &hook, |res| assert!(res.is_ok()))
            .expect("save");

        let store2 = BucketStore::new();
        let loaded = store2
            .load(&path, config(RdbId(0)), Box::new(SystemAllocator::new()))
            .expect("load");
        assert_eq!(loaded.get_num_keys(CollNum(0)).unwrap(), 1);
        assert_eq!(store2.get(RdbId(0)).unwrap().get_num_keys(CollNum(0)).unwrap(), 1);
    }

    #[test]
    fn remove_drops_set_from_store() {
        let store = BucketStore::new();
        store
            .create(config(RdbId(9)), Box::new(SystemAllocator::new()))
            .unwrap();
        assert!(store.remove(RdbId(9)).unwrap().is_some());
        assert!(store.get(RdbId(9)).is_err());
    }
}
