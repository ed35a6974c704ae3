//! `fastSave` / `fastLoad` — atomic snapshot persistence (§4.3).
//!
//! Produces a byte-exact image of one [`BucketSet`]'s directory, suitable
//! for restore within the same build. Not portable across endianness or
//! between different `key_size`/`fixed_data_size` configurations — a
//! mismatch on load surfaces as [`BucketError::ConfigMismatch`].
//!
//! # On-disk layout
//!
//! ```text
//! [header][bucket block]...[bucket block][u32 crc32 of everything above]
//! ```
//!
//! Header: `magic(u32) version(u16) key_size(u8) fixed_data_size(u64)
//! num_buckets(u64) rec_size(u64)`.
//!
//! Bucket block: `collnum(i32) num_keys(u64) raw_records(num_keys * rec_size)`.
//! Buckets are always written fully sorted (`clean_buckets` runs first), so
//! `endKey`/`lastSorted` need not be persisted — they're recomputed from
//! the raw bytes on load.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::alloc::BucketAllocator;
use crate::bucket_set::{BucketSet, BucketSetConfig};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::error::{BucketError, Result};
use crate::key::CollNum;
use crate::yield_hook::{Breather, NoopYieldHook, YieldHook};

const MAGIC: u32 = 0x4253_4B42; // "BKSB", arbitrary but stable
const VERSION: u16 = 1;
const TMP_SUFFIX: &str = ".tmp";

struct Header {
    key_size: u8,
    fixed_data_size: u64,
    num_buckets: u64,
    rec_size: u64,
}

impl Encode for Header {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        MAGIC.encode_to(buf)?;
        VERSION.encode_to(buf)?;
        self.key_size.encode_to(buf)?;
        self.fixed_data_size.encode_to(buf)?;
        self.num_buckets.encode_to(buf)?;
        self.rec_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = u32::decode_from(&buf[off..])?;
        off += n;
        if magic != MAGIC {
            return Err(EncodingError::Custom(format!(
                "bad snapshot magic: {magic:#x}"
            )));
        }
        let (version, n) = u16::decode_from(&buf[off..])?;
        off += n;
        if version != VERSION {
            return Err(EncodingError::Custom(format!(
                "unsupported snapshot version: {version}"
            )));
        }
        let (key_size, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (fixed_data_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (num_buckets, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (rec_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key_size,
                fixed_data_size,
                num_buckets,
                rec_size,
            },
            off,
        ))
    }
}

/// Serializes `bucket_set`'s entire directory to `path`, atomically
/// (temp-file-then-rename). Runs the protocol from §4.3: clears
/// `writable`, latches `saving`, sorts every bucket, writes, then restores
/// `writable` and clears `saving`/`dirty` on success.
///
/// Takes `Arc<BucketSet>` (rather than a borrow) so the `use_thread` path
/// can hand the handle to a background thread without unsafe lifetime
/// extension — the caller's own clone of the `Arc` keeps working
/// regardless of when the background thread finishes.
///
/// If `use_thread` is set, the write happens on a background thread and
/// `path` is returned to `callback` once it completes; otherwise the save
/// runs synchronously and `callback` fires before this function returns.
pub fn fast_save(
    bucket_set: Arc<BucketSet>,
    path: impl AsRef<Path>,
    use_thread: bool,
    hook: &dyn YieldHook,
    callback: impl FnOnce(Result<PathBuf>) + Send + 'static,
) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    bucket_set.disable_writes();
    bucket_set.set_saving(true);

    let mut breather = Breather::new(hook, 0, 64);
    if let Err(e) = bucket_set.clean_buckets(&mut breather) {
        bucket_set.set_saving(false);
        bucket_set.enable_writes();
        return Err(e);
    }

    let bytes = match encode_image(&bucket_set) {
        Ok(bytes) => bytes,
        Err(e) => {
            bucket_set.set_saving(false);
            bucket_set.enable_writes();
            return Err(e);
        }
    };

    let run = move || -> Result<PathBuf> {
        write_atomic(&path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "fastSave complete");
        Ok(path)
    };

    if use_thread {
        let finish = move |bucket_set: Arc<BucketSet>, result: Result<PathBuf>| {
            bucket_set.set_saving(false);
            bucket_set.enable_writes();
            if result.is_ok() {
                bucket_set.set_dirty(false);
            }
            callback(result);
        };
        thread::spawn(move || {
            let result = run();
            finish(bucket_set, result);
        });
        Ok(())
    } else {
        let result = run();
        bucket_set.set_saving(false);
        bucket_set.enable_writes();
        if result.is_ok() {
            bucket_set.set_dirty(false);
        }
        let result_for_caller = match &result {
            Ok(p) => Ok(p.clone()),
            Err(_) => Err(BucketError::Internal("fastSave failed".into())),
        };
        callback(result);
        result_for_caller.map(|_| ())
    }
}

fn encode_image(bucket_set: &BucketSet) -> Result<Vec<u8>> {
    let config = bucket_set.config();
    let layout = config.layout();
    let entries = bucket_set.directory_snapshot()?;

    let header = Header {
        key_size: config.key_size.as_usize() as u8,
        fixed_data_size: config.fixed_data_size as u64,
        num_buckets: entries.len() as u64,
        rec_size: layout.rec_size() as u64,
    };

    let mut buf = Vec::new();
    header
        .encode_to(&mut buf)
        .map_err(BucketError::Encoding)?;
    for (collnum, num_keys, raw) in &entries {
        buf.extend_from_slice(&collnum.0.to_le_bytes());
        buf.extend_from_slice(&(*num_keys as u64).to_le_bytes());
        buf.extend_from_slice(raw);
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path
            .file_name()
            .ok_or_else(|| BucketError::Internal("snapshot path has no file name".into()))?
            .to_os_string();
        name.push(TMP_SUFFIX);
        path.with_file_name(name)
    };

    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent() {
        if let Ok(dir_file) = fs::File::open(dir) {
            dir_file.sync_all()?;
        }
    }
    Ok(())
}

/// Reconstructs a [`BucketSet`] from a snapshot written by [`fast_save`].
/// `config`'s `key_size`/`fixed_data_size` must match the ones the
/// snapshot was written with, or this fails with
/// [`BucketError::ConfigMismatch`].
pub fn fast_load(
    path: impl AsRef<Path>,
    config: BucketSetConfig,
    alloc: Box<dyn BucketAllocator>,
) -> Result<BucketSet> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    // SAFETY: the file is opened read-only and not concurrently modified
    // by this process; the mapping is dropped before this function
    // returns (all bytes are copied out into owned buffers).
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < 4 {
        return Err(BucketError::CorruptImage("snapshot too short".into()));
    }
    let crc_at = mmap.len() - 4;
    let mut expected = [0u8; 4];
    expected.copy_from_slice(&mmap[crc_at..]);
    let expected = u32::from_le_bytes(expected);

    let mut hasher = Crc32::new();
    hasher.update(&mmap[..crc_at]);
    if hasher.finalize() != expected {
        return Err(BucketError::CorruptImage(
            "snapshot checksum mismatch".into(),
        ));
    }

    let body = &mmap[..crc_at];
    let (header, mut offset) = Header::decode_from(body).map_err(BucketError::Encoding)?;

    if header.key_size as usize != config.key_size.as_usize()
        || header.fixed_data_size as usize != config.fixed_data_size
    {
        return Err(BucketError::ConfigMismatch(format!(
            "snapshot key_size={} fixed_data_size={} vs configured key_size={} fixed_data_size={}",
            header.key_size,
            header.fixed_data_size,
            config.key_size.as_usize(),
            config.fixed_data_size
        )));
    }

    let rec_size = config.layout().rec_size();
    if header.rec_size as usize != rec_size {
        return Err(BucketError::ConfigMismatch(format!(
            "snapshot rec_size={} vs configured rec_size={rec_size}",
            header.rec_size
        )));
    }

    let mut entries = Vec::with_capacity(header.num_buckets as usize);
    for _ in 0..header.num_buckets {
        if offset + 4 + 8 > body.len() {
            return Err(BucketError::CorruptImage(
                "truncated bucket block header".into(),
            ));
        }
        let collnum = i32::from_le_bytes(body[offset..offset + 4].try_into().map_err(|_| {
            BucketError::CorruptImage("malformed collnum field".into())
        })?);
        offset += 4;
        let num_keys = u64::from_le_bytes(body[offset..offset + 8].try_into().map_err(|_| {
            BucketError::CorruptImage("malformed num_keys field".into())
        })?) as usize;
        offset += 8;

        if num_keys > config.bucket_capacity {
            return Err(BucketError::CorruptImage(format!(
                "bucket declares {num_keys} keys, exceeds bucket_capacity {}",
                config.bucket_capacity
            )));
        }

        let byte_len = num_keys * rec_size;
        if offset + byte_len > body.len() {
            return Err(BucketError::CorruptImage(
                "truncated bucket record bytes".into(),
            ));
        }
        let raw = body[offset..offset + byte_len].to_vec();
        offset += byte_len;
        entries.push((CollNum(collnum), raw));
    }

    debug!(buckets = entries.len(), path = %path.display(), "fastLoad decoded image");

    let bucket_set = BucketSet::new(config, alloc)?;
    bucket_set.restore_directory(entries)?;
    if let Err(e) = bucket_set.self_test() {
        warn!(error = %e, "fastLoad image failed self_test");
        return Err(e);
    }
    Ok(bucket_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;
    use crate::key::{KeySize, RdbId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(dir_name: &str) -> BucketSetConfig {
        BucketSetConfig {
            key_size: KeySize::Twelve,
            fixed_data_size: 4,
            max_mem: 1024 * 1024,
            bucket_capacity: 4,
            alloc_tag: "snapshot.test".into(),
            rdb_id: RdbId(0),
            dbname: dir_name.into(),
        }
    }

    fn key12(b: u8) -> Vec<u8> {
        let mut k = vec![0u8; 12];
        k[11] = b;
        k
    }

    #[test]
    fn save_then_load_round_trips_s6() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let path = tmp.path().join("bucketset.snap");

        let bs = Arc::new(
            BucketSet::new(config("s6"), Box::new(SystemAllocator::new())).expect("new"),
        );
        for b in [0x10, 0x20, 0x30, 0x40, 0x25] {
            bs.add_node(CollNum(0), &key12(b), &[1, 2, 3, 4]).unwrap();
        }

        let hook = NoopYieldHook;
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        fast_save(bs.clone(), &path, false, &hook, move |res| {
            assert!(res.is_ok());
            done2.fetch_add(1, Ordering::SeqCst);
        })
        .expect("fast_save");
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(bs.is_writable());
        assert!(!bs.is_dirty());

        let loaded = fast_load(&path, config("s6"), Box::new(SystemAllocator::new())).expect("fast_load");

        let mut breather = Breather::new(&hook, 0, 8);
        let before = bs
            .get_list(CollNum(0), &key12(0x00), &key12(0xFF), usize::MAX, false, &mut breather)
            .unwrap();
        let mut breather = Breather::new(&hook, 0, 8);
        let after = loaded
            .get_list(CollNum(0), &key12(0x00), &key12(0xFF), usize::MAX, false, &mut breather)
            .unwrap();
        assert_eq!(before.into_bytes(), after.into_bytes());
    }

    #[test]
    fn load_rejects_mismatched_config() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let path = tmp.path().join("bucketset.snap");
        let bs = Arc::new(
            BucketSet::new(config("mismatch"), Box::new(SystemAllocator::new())).expect("new"),
        );
        bs.add_node(CollNum(0), &key12(0x10), &[1, 2, 3, 4]).unwrap();

        let hook = NoopYieldHook;
        fast_save(bs.clone(), &path, false, &hook, |_| {}).expect("fast_save");

        let mut bad = config("mismatch");
        bad.fixed_data_size = 8;
        let err = fast_load(&path, bad, Box::new(SystemAllocator::new())).unwrap_err();
        assert!(matches!(err, BucketError::ConfigMismatch(_)));
    }
}
