//! Byte-level object storage with conditional writes.
//!
//! Every object carries a numeric generation that increases on each write.
//! A writer that read generation `g` can make its write conditional on the
//! object still being at `g`; a lost race comes back as
//! [`WriteResult::PreconditionFailed`], never as an error.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// Precondition for a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object exists at this generation.
    MatchesGeneration(u64),
    /// Write unconditionally.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Success { generation: u64 },
    /// `current` is `None` when the object does not exist.
    PreconditionFailed { current: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub generation: u64,
}

pub trait ObjectStore {
    /// Read a whole object; a missing object is [`StorageError::NotFound`].
    fn get(&self, key: &str) -> StorageResult<StoredObject>;

    fn put(&self, key: &str, data: &[u8], precondition: WritePrecondition)
        -> StorageResult<WriteResult>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn get(&self, key: &str) -> StorageResult<StoredObject> {
        (**self).get(key)
    }

    fn put(
        &self,
        key: &str,
        data: &[u8],
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult> {
        (**self).put(key, data, precondition)
    }
}

fn check_precondition(precondition: WritePrecondition, current: Option<u64>) -> bool {
    match precondition {
        WritePrecondition::DoesNotExist => current.is_none(),
        WritePrecondition::MatchesGeneration(expected) => current == Some(expected),
        WritePrecondition::None => true,
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every object's bytes, keyed and ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.read_objects()
            .iter()
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }

    /// Snapshot restricted to keys under `prefix`.
    pub fn snapshot_prefix(&self, prefix: &str) -> BTreeMap<String, Vec<u8>> {
        self.read_objects()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read_objects().keys().cloned().collect()
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<StoredObject> {
        self.read_objects()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn put(
        &self,
        key: &str,
        data: &[u8],
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult> {
        let mut objects = self
            .objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = objects.get(key).map(|o| o.generation);
        if !check_precondition(precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current });
        }

        let generation = current.map_or(1, |g| g + 1);
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                generation,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteResult::Success { generation })
    }
}

/// How long a reader or writer waits for a held lock by default.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Age past which a lock is taken to be left behind by a dead process.
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(600);

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Store rooted at a directory; keys are relative paths.
///
/// Object bytes live at `root/key`, the generation in `root/key.gen`.
/// Reads and writes both hold `root/key.lock` (created exclusively), so a
/// read always returns bytes together with the generation they were
/// written at, and a write checks its precondition and renames the new
/// bytes into place without interference.
///
/// The lock file records the owner's process id and the time it was taken.
/// A lock older than the stale threshold is removed and retaken; deleting
/// the `.lock` file by hand has the same effect.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_wait: Duration,
    lock_stale_after: Duration,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    /// Wait at most `wait` for a held lock before failing with
    /// [`StorageError::Locked`]; break locks older than `stale_after`.
    pub fn with_lock_timing(mut self, wait: Duration, stale_after: Duration) -> Self {
        self.lock_wait = wait;
        self.lock_stale_after = stale_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn lock(&self, key: &str, path: &Path) -> StorageResult<LockGuard> {
        LockGuard::acquire(
            key,
            Self::sidecar(path, ".lock"),
            self.lock_wait,
            self.lock_stale_after,
        )
    }

    fn generation(&self, key: &str, path: &Path) -> StorageResult<Option<u64>> {
        if !path.exists() {
            return Ok(None);
        }
        match fs::read_to_string(Self::sidecar(path, ".gen")) {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| StorageError::corrupt(key, format!("bad generation: {e}"))),
            // Written by something other than this store.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(0)),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    fn write_atomic(key: &str, path: &Path, data: &[u8]) -> StorageResult<()> {
        let temp_path = Self::sidecar(path, ".tmp");
        let mut file = File::create(&temp_path).map_err(|e| StorageError::io(key, e))?;
        file.write_all(data).map_err(|e| StorageError::io(key, e))?;
        file.sync_all().map_err(|e| StorageError::io(key, e))?;
        fs::rename(&temp_path, path).map_err(|e| StorageError::io(key, e))
    }
}

/// Removes the lock file when the read or write finishes, successfully or not.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(key: &str, path: PathBuf, wait: Duration, stale_after: Duration) -> StorageResult<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let taken_at = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_or(0, |d| d.as_secs());
                    // Owner details are informational; the lock is the file itself.
                    let _ = writeln!(file, "{} {taken_at}", process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_age(&path).is_some_and(|age| age >= stale_after) {
                        warn!(key, lock = %path.display(), "removing stale lock");
                        match fs::remove_file(&path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => return Err(StorageError::io(key, e)),
                        }
                    }
                    if started.elapsed() >= wait {
                        return Err(StorageError::locked(key));
                    }
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(StorageError::io(key, e)),
            }
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl ObjectStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let path = self.path(key);
        if !path.exists() {
            return Err(StorageError::not_found(key));
        }

        let _lock = self.lock(key, &path)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::not_found(key)),
            Err(e) => return Err(StorageError::io(key, e)),
        };
        let generation = self.generation(key, &path)?.unwrap_or(0);
        Ok(StoredObject { data, generation })
    }

    fn put(
        &self,
        key: &str,
        data: &[u8],
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(key, e))?;
        }

        let _lock = self.lock(key, &path)?;

        let current = self.generation(key, &path)?;
        if !check_precondition(precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current });
        }

        let generation = current.map_or(1, |g| g + 1);
        Self::write_atomic(key, &path, data)?;
        Self::write_atomic(
            key,
            &Self::sidecar(&path, ".gen"),
            generation.to_string().as_bytes(),
        )?;
        Ok(WriteResult::Success { generation })
    }
}
