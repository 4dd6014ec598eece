//! Durable, session-keyed store for raw and montage-derived recordings.
//!
//! Every object is written to a temporary file and renamed into place, so a
//! reader either sees the previous object or the new one, never a torn write.
//! Decoded objects are memoized in memory and revalidated against the file's
//! modification time and length on every read.

use crate::error::{CoreError, Result};
use crate::types::{sample_count, Annotation, Matrix, MontageSpec};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

const RAW_SUFFIX: &str = "raw.msgpack.lz4";
const DERIVED_SUFFIX: &str = "derived.msgpack.lz4";

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the cache objects
    pub directory: PathBuf,
    /// How often `await_raw` re-checks the file system for writers in other processes
    pub poll_interval: Duration,
    /// Number of decoded sessions kept in memory per object kind
    pub memo_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("neurogram"),
            poll_interval: Duration::from_millis(250),
            memo_capacity: 16,
        }
    }
}

/// Raw recording as ingested for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub data: Matrix,
    pub labels: Vec<String>,
    pub sample_rate: f64,
    pub source_path: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    pub stored_at: DateTime<Utc>,
}

/// Montage-derived view of a session's recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedObject {
    pub data: Matrix,
    pub labels: Vec<String>,
    pub montage: Option<MontageSpec>,
    pub stored_at: DateTime<Utc>,
}

/// The matrix a session currently serves: derived when a montage is stored,
/// raw otherwise.
#[derive(Debug, Clone)]
pub enum EffectiveMatrix {
    Raw(Arc<RawObject>),
    Derived(Arc<DerivedObject>),
}

impl EffectiveMatrix {
    pub fn data(&self) -> &Matrix {
        match self {
            Self::Raw(raw) => &raw.data,
            Self::Derived(derived) => &derived.data,
        }
    }

    pub fn labels(&self) -> &[String] {
        match self {
            Self::Raw(raw) => &raw.labels,
            Self::Derived(derived) => &derived.labels,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Derived(_))
    }

    pub fn num_samples(&self) -> usize {
        sample_count(self.data())
    }
}

/// A half-open slice `[start, end)` of every effective channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub data: Matrix,
    pub labels: Vec<String>,
    pub start: usize,
    pub end: usize,
    pub total_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
        })
    }
}

/// Insertion-ordered memo that evicts the oldest session once full
#[derive(Debug)]
struct LruCache<V> {
    map: HashMap<String, (FileStamp, Arc<V>)>,
    order: VecDeque<String>,
    max_size: usize,
}

impl<V> LruCache<V> {
    fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    fn get(&self, key: &str, stamp: FileStamp) -> Option<Arc<V>> {
        self.map
            .get(key)
            .filter(|(cached, _)| *cached == stamp)
            .map(|(_, value)| Arc::clone(value))
    }

    fn insert(&mut self, key: String, stamp: FileStamp, value: Arc<V>) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }

        while self.map.len() >= self.max_size && !self.order.is_empty() {
            if let Some(old_key) = self.order.pop_front() {
                self.map.remove(&old_key);
                log::debug!("Cache memo evicted: {}", old_key);
            }
        }

        self.map.insert(key.clone(), (stamp, value));
        self.order.push_back(key);
    }
}

/// Session-scoped time-series cache
pub struct TimeSeriesCache {
    config: CacheConfig,
    raw_memo: Mutex<LruCache<RawObject>>,
    derived_memo: Mutex<LruCache<DerivedObject>>,
    ready_lock: Mutex<()>,
    ready: Condvar,
}

impl TimeSeriesCache {
    /// Open (creating if needed) the cache directory
    pub fn open(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;
        log::info!("Time-series cache at {}", config.directory.display());

        Ok(Self {
            raw_memo: Mutex::new(LruCache::new(config.memo_capacity)),
            derived_memo: Mutex::new(LruCache::new(config.memo_capacity)),
            ready_lock: Mutex::new(()),
            ready: Condvar::new(),
            config,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Persist the raw recording for a session, replacing any previous one
    pub fn store_raw(&self, session_id: &str, object: RawObject) -> Result<()> {
        validate_matrix(&object.data, &object.labels)?;
        let path = self.object_path(session_id, RAW_SUFFIX)?;
        let stamp = self.publish(&path, &object)?;

        self.raw_memo
            .lock()
            .insert(session_id.to_string(), stamp, Arc::new(object));

        // Wake anyone blocked in await_raw; notifying under the lock pairs
        // with the existence check they perform while holding it.
        let _guard = self.ready_lock.lock();
        self.ready.notify_all();

        log::info!("Stored raw recording for session {}", session_id);
        Ok(())
    }

    /// Persist a montage-derived matrix, replacing any previous one
    pub fn store_derived(&self, session_id: &str, object: DerivedObject) -> Result<()> {
        validate_matrix(&object.data, &object.labels)?;
        let path = self.object_path(session_id, DERIVED_SUFFIX)?;
        let stamp = self.publish(&path, &object)?;

        self.derived_memo
            .lock()
            .insert(session_id.to_string(), stamp, Arc::new(object));

        log::info!("Stored derived recording for session {}", session_id);
        Ok(())
    }

    /// Raw object for a session
    pub fn fetch_raw(&self, session_id: &str) -> Result<Arc<RawObject>> {
        let path = self.object_path(session_id, RAW_SUFFIX)?;
        load(&path, session_id, &self.raw_memo)?
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))
    }

    /// Derived object for a session, if a montage has been stored
    pub fn fetch_derived(&self, session_id: &str) -> Result<Option<Arc<DerivedObject>>> {
        let path = self.object_path(session_id, DERIVED_SUFFIX)?;
        load(&path, session_id, &self.derived_memo)
    }

    /// Derived matrix if present, raw otherwise
    pub fn fetch_effective(&self, session_id: &str) -> Result<EffectiveMatrix> {
        if let Some(derived) = self.fetch_derived(session_id)? {
            return Ok(EffectiveMatrix::Derived(derived));
        }
        self.fetch_raw(session_id).map(EffectiveMatrix::Raw)
    }

    /// Samples `[start, end)` of every effective channel.
    ///
    /// Indices are signed so out-of-range requests from callers are reported
    /// rather than wrapped; nothing is clamped.
    pub fn chunk(&self, session_id: &str, start: i64, end: i64) -> Result<Chunk> {
        let effective = self.fetch_effective(session_id)?;
        let available = effective.num_samples();

        if start < 0 || start >= end || end as u64 > available as u64 {
            return Err(CoreError::Range {
                start,
                end,
                available,
            });
        }

        Ok(slice(&effective, start as usize, end as usize))
    }

    /// The `n`-th of `total` chunks, `[n*T/total, (n+1)*T/total)`.
    ///
    /// Chunk sizes differ by at most one sample and the chunks tile the whole
    /// recording. With fewer samples than chunks some chunks are empty.
    pub fn chunk_ordinal(&self, session_id: &str, n: usize, total: usize) -> Result<Chunk> {
        let effective = self.fetch_effective(session_id)?;
        let available = effective.num_samples();
        if total == 0 || n >= total {
            return Err(CoreError::Range {
                start: n as i64,
                end: total as i64,
                available,
            });
        }

        let boundary = |k: usize| (k as u128 * available as u128 / total as u128) as usize;
        Ok(slice(&effective, boundary(n), boundary(n + 1)))
    }

    pub fn sample_rate(&self, session_id: &str) -> Result<f64> {
        Ok(self.fetch_raw(session_id)?.sample_rate)
    }

    pub fn sample_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.fetch_effective(session_id)?.num_samples())
    }

    /// Montage currently applied to a session
    pub fn montage(&self, session_id: &str) -> Result<Option<MontageSpec>> {
        Ok(self
            .fetch_derived(session_id)?
            .and_then(|derived| derived.montage.clone()))
    }

    /// Block until a raw object exists for `session_id` or `timeout` elapses
    pub fn await_raw(&self, session_id: &str, timeout: Duration) -> Result<()> {
        let path = self.object_path(session_id, RAW_SUFFIX)?;
        let deadline = Instant::now() + timeout;

        let mut guard = self.ready_lock.lock();
        loop {
            if path.exists() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "Timed out waiting for session {} after {:?}",
                    session_id,
                    timeout
                );
                return Err(CoreError::Timeout {
                    session_id: session_id.to_string(),
                    seconds: timeout.as_secs_f64(),
                });
            }

            let wait = (deadline - now).min(self.config.poll_interval);
            self.ready.wait_for(&mut guard, wait);
        }
    }

    fn object_path(&self, session_id: &str, suffix: &str) -> Result<PathBuf> {
        if session_id.is_empty() {
            return Err(CoreError::InvalidInput("empty session id".to_string()));
        }
        Ok(self
            .config
            .directory
            .join(format!("EEG_{}.{}", encode_session_id(session_id), suffix)))
    }

    /// Encode, write to a temporary sibling, then rename over `path`.
    /// Returns the stamp of the published file.
    fn publish<T: Serialize>(&self, path: &Path, object: &T) -> Result<FileStamp> {
        let msgpack_bytes = rmp_serde::to_vec_named(object)?;
        let compressed = lz4_flex::compress_prepend_size(&msgpack_bytes);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = self
            .config
            .directory
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let written = (|| -> std::io::Result<FileStamp> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
            // Rename keeps mtime and length, so this is the published file's stamp
            let stamp = FileStamp::of(&tmp_path)?;
            fs::rename(&tmp_path, path)?;
            Ok(stamp)
        })();

        written.map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CoreError::Io(e)
        })
    }
}

fn load<T: DeserializeOwned>(
    path: &Path,
    session_id: &str,
    memo: &Mutex<LruCache<T>>,
) -> Result<Option<Arc<T>>> {
    let stamp = match FileStamp::of(path) {
        Ok(stamp) => stamp,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if let Some(cached) = memo.lock().get(session_id, stamp) {
        return Ok(Some(cached));
    }

    let compressed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: String| CoreError::CorruptCache {
        path: path.display().to_string(),
        reason,
    };
    let decompressed = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| corrupt(format!("LZ4 decompression failed: {}", e)))?;
    let object: T = rmp_serde::from_slice(&decompressed)
        .map_err(|e| corrupt(format!("MessagePack decode failed: {}", e)))?;

    let object = Arc::new(object);
    memo.lock()
        .insert(session_id.to_string(), stamp, Arc::clone(&object));
    Ok(Some(object))
}

/// Caller guarantees `start <= end <= num_samples`
fn slice(effective: &EffectiveMatrix, start: usize, end: usize) -> Chunk {
    Chunk {
        data: effective
            .data()
            .iter()
            .map(|channel| channel[start..end].to_vec())
            .collect(),
        labels: effective.labels().to_vec(),
        start,
        end,
        total_samples: effective.num_samples(),
    }
}

fn validate_matrix(data: &[Vec<f64>], labels: &[String]) -> Result<()> {
    if data.len() != labels.len() {
        return Err(CoreError::InvalidInput(format!(
            "{} channel rows but {} labels",
            data.len(),
            labels.len()
        )));
    }
    let samples = sample_count(data);
    if data.iter().any(|channel| channel.len() != samples) {
        return Err(CoreError::InvalidInput(
            "all channels must have the same number of samples".to_string(),
        ));
    }
    Ok(())
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so every id is one file name
fn encode_session_id(session_id: &str) -> String {
    let mut encoded = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::thread;
    use tempfile::TempDir;

    fn open_cache(dir: &TempDir) -> TimeSeriesCache {
        TimeSeriesCache::open(CacheConfig {
            directory: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(20),
            memo_capacity: 4,
        })
        .unwrap()
    }

    fn raw_object(samples: usize) -> RawObject {
        RawObject {
            data: vec![
                (0..samples).map(|i| i as f64).collect(),
                (0..samples).map(|i| -(i as f64)).collect(),
            ],
            labels: vec!["EEG FP1".to_string(), "EEG F3".to_string()],
            sample_rate: 256.0,
            source_path: Some("/tmp/rec.edf".to_string()),
            annotations: vec![],
            stored_at: Utc::now(),
        }
    }

    #[test]
    fn test_fetch_before_store_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        assert!(matches!(
            cache.chunk("abc", 0, 10),
            Err(CoreError::NotFound(id)) if id == "abc"
        ));
        assert!(matches!(cache.fetch_effective("abc"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_await_raw_times_out() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let started = Instant::now();
        let err = cache
            .await_raw("never", Duration::from_millis(150))
            .unwrap_err();

        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_await_raw_wakes_on_store() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(open_cache(&dir));

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cache.store_raw("s1", raw_object(100)).unwrap();
            })
        };

        cache.await_raw("s1", Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert_eq!(cache.sample_count("s1").unwrap(), 100);
    }

    #[test]
    fn test_effective_prefers_derived() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache.store_raw("s1", raw_object(10)).unwrap();

        assert!(!cache.fetch_effective("s1").unwrap().is_derived());

        cache
            .store_derived(
                "s1",
                DerivedObject {
                    data: vec![vec![1.0; 10]],
                    labels: vec!["FP1-F3".to_string()],
                    montage: Some(MontageSpec::from_pairs(&[("FP1", "F3")])),
                    stored_at: Utc::now(),
                },
            )
            .unwrap();

        let effective = cache.fetch_effective("s1").unwrap();
        assert!(effective.is_derived());
        assert_eq!(effective.labels(), ["FP1-F3".to_string()]);
        assert_eq!(cache.chunk("s1", 2, 4).unwrap().data, vec![vec![1.0, 1.0]]);
        assert!(cache.montage("s1").unwrap().is_some());
    }

    #[test]
    fn test_chunk_range_errors() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache.store_raw("s1", raw_object(10)).unwrap();

        for (start, end) in [(-1, 5), (5, 5), (6, 5), (0, 11)] {
            assert!(
                matches!(cache.chunk("s1", start, end), Err(CoreError::Range { .. })),
                "expected range error for [{start}, {end})"
            );
        }
        assert_eq!(cache.chunk("s1", 0, 10).unwrap().end, 10);
    }

    #[test]
    fn test_chunks_tile_the_recording() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache.store_raw("s1", raw_object(103)).unwrap();
        let full = cache.fetch_effective("s1").unwrap().data().clone();

        let bounds = [0, 7, 40, 41, 103];
        let mut stitched = vec![Vec::new(); full.len()];
        for pair in bounds.windows(2) {
            let chunk = cache.chunk("s1", pair[0], pair[1]).unwrap();
            for (row, part) in stitched.iter_mut().zip(chunk.data) {
                row.extend(part);
            }
        }
        assert_eq!(stitched, full);

        let mut by_ordinal = vec![Vec::new(); full.len()];
        for n in 0..4 {
            let chunk = cache.chunk_ordinal("s1", n, 4).unwrap();
            for (row, part) in by_ordinal.iter_mut().zip(chunk.data) {
                row.extend(part);
            }
        }
        assert_eq!(by_ordinal, full);
        assert!(matches!(
            cache.chunk_ordinal("s1", 4, 4),
            Err(CoreError::Range { .. })
        ));
    }

    #[test]
    fn test_ordinal_chunks_with_fewer_samples_than_chunks() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache.store_raw("s1", raw_object(3)).unwrap();

        let bounds: Vec<(usize, usize)> = (0..5)
            .map(|n| {
                let chunk = cache.chunk_ordinal("s1", n, 5).unwrap();
                assert_eq!(chunk.data.len(), 2);
                assert_eq!(chunk.data[0].len(), chunk.end - chunk.start);
                (chunk.start, chunk.end)
            })
            .collect();

        assert_eq!(bounds, vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 3)]);
        assert!(matches!(
            cache.chunk_ordinal("s1", 0, 0),
            Err(CoreError::Range { .. })
        ));
    }

    #[test]
    fn test_concurrent_readers_see_whole_objects() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache.store_raw("s1", raw_object(50)).unwrap();
        let derived_stored = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..40 {
                    let samples = 50 + round;
                    cache.store_raw("s1", raw_object(samples)).unwrap();
                    if round >= 20 {
                        cache
                            .store_derived(
                                "s1",
                                DerivedObject {
                                    data: vec![vec![round as f64; samples]],
                                    labels: vec!["FP1-F3".to_string()],
                                    montage: Some(MontageSpec::from_pairs(&[("FP1", "F3")])),
                                    stored_at: Utc::now(),
                                },
                            )
                            .unwrap();
                        derived_stored.store(true, AtomicOrdering::SeqCst);
                    }
                }
            });

            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let must_be_derived = derived_stored.load(AtomicOrdering::SeqCst);
                        let effective = cache.fetch_effective("s1").unwrap();
                        assert_eq!(effective.data().len(), effective.labels().len());
                        let samples = effective.num_samples();
                        assert!(effective.data().iter().all(|row| row.len() == samples));
                        if must_be_derived {
                            assert!(effective.is_derived());
                        }

                        let chunk = cache.chunk("s1", 0, 10).unwrap();
                        assert_eq!(chunk.data.len(), chunk.labels.len());
                        assert!(chunk.data.iter().all(|row| row.len() == 10));
                    }
                });
            }
        });

        assert!(cache.fetch_effective("s1").unwrap().is_derived());
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir);
            cache.store_raw("patient/01", raw_object(20)).unwrap();
        }

        let reopened = open_cache(&dir);
        let raw = reopened.fetch_raw("patient/01").unwrap();
        assert_eq!(raw.sample_rate, 256.0);
        assert_eq!(raw.data[0].len(), 20);

        // No temporary files are left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_memo_sees_writes_from_another_handle() {
        let dir = TempDir::new().unwrap();
        let first = open_cache(&dir);
        let second = open_cache(&dir);

        first.store_raw("s1", raw_object(10)).unwrap();
        assert_eq!(second.sample_count("s1").unwrap(), 10);

        first.store_raw("s1", raw_object(30)).unwrap();
        assert_eq!(second.sample_count("s1").unwrap(), 30);
    }

    #[test]
    fn test_corrupt_object_reported() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        fs::write(dir.path().join("EEG_bad.raw.msgpack.lz4"), b"not a cache object").unwrap();

        assert!(matches!(
            cache.fetch_raw("bad"),
            Err(CoreError::CorruptCache { .. })
        ));
    }

    #[test]
    fn test_rejects_ragged_matrix() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let mut object = raw_object(10);
        object.data[1].pop();

        assert!(matches!(
            cache.store_raw("s1", object),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_session_id_encoding() {
        assert_eq!(encode_session_id("abc-DEF_1"), "abc-DEF_1");
        assert_eq!(encode_session_id("a/b c"), "a%2Fb%20c");
    }
}
