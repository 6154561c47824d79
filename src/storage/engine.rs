//! Sharded Keyspace with Lazy Expiry
//!
//! The keyspace maps keys to [`Object`]s and is shared by every client
//! session, so it is split into shards, each a `RwLock<HashMap>`:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Every single-key operation holds exactly one shard lock for its whole
//! read-check-write sequence, so a SET or EXPIRE is never observed half done.
//! [`StorageEngine::snapshot`] is the only operation that holds several
//! locks: it takes the read lock of every shard in ascending index order,
//! copies, and releases them all before returning.
//!
//! ## Expiry
//!
//! Presence is recomputed against the clock on every access. An object whose
//! `expires_at` is not strictly after "now" is absent for every read path
//! (GET, TTL, DEL, EXPIRE, snapshot) even while it still sits in the map.
//! Reads that trip over such an object remove it on the way out.

use crate::storage::clock::{Clock, SystemClock};
use crate::storage::object::{Object, Value};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Number of shards. Must stay constant for the lifetime of an engine since
/// keys are routed by `hash % NUM_SHARDS`.
const NUM_SHARDS: usize = 64;

type ShardMap = HashMap<Bytes, Object>;

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

// Each critical section is a single insert, remove or field store, so a
// poisoned map is still consistent.
fn read(shard: &Shard) -> RwLockReadGuard<'_, ShardMap> {
    shard.data.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shard: &Shard) -> RwLockWriteGuard<'_, ShardMap> {
    shard.data.write().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time copy of every live key.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Clock reading the liveness filter was evaluated against.
    pub taken_at_ms: u64,
    pub entries: Vec<(Bytes, Object)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Entries physically held, including expired ones not yet evicted.
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    /// Expired entries evicted, lazily or by the sweeper.
    pub expired: u64,
}

/// The keyspace shared by all client sessions.
///
/// # Example
///
/// ```
/// use cinderkv::storage::{Object, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.put(Bytes::from("name"), Object::new("Ariz"));
///
/// let obj = engine.get(b"name").unwrap();
/// assert_eq!(obj.value.as_bytes(), &Bytes::from("Ariz"));
/// assert_eq!(engine.ttl(b"name"), Some(-1));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    clock: Arc<dyn Clock>,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("clock", &self.clock)
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty engine on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty engine that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            clock,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Current time according to the engine's clock.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Inserts or replaces the object under `key`. The previous value and
    /// expiry are discarded entirely.
    pub fn put(&self, key: Bytes, object: Object) {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        write(self.shard(&key)).insert(key, object);
    }

    /// Stores `value` with no expiry.
    pub fn set(&self, key: Bytes, value: impl Into<Value>) {
        self.put(key, Object::new(value));
    }

    /// Stores `value` expiring `ttl` from now.
    pub fn set_with_ttl(&self, key: Bytes, value: impl Into<Value>, ttl: Duration) {
        let at = self.now_ms().saturating_add(ttl.as_millis() as u64);
        self.put(key, Object::expiring(value, at));
    }

    /// Returns the live object under `key`.
    pub fn get(&self, key: &[u8]) -> Option<Object> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.lookup(key, self.now_ms())
    }

    /// Read-locked fast path; falls back to the write lock only to evict an
    /// expired entry.
    fn lookup(&self, key: &[u8], now: u64) -> Option<Object> {
        let shard = self.shard(key);

        {
            let data = read(shard);
            match data.get(key) {
                None => return None,
                Some(obj) if obj.is_live(now) => return Some(obj.clone()),
                Some(_) => {}
            }
        }

        // Another writer may have replaced the entry between the two locks.
        let mut data = write(shard);
        match data.get(key).map(|obj| obj.is_live(now)) {
            Some(true) => data.get(key).cloned(),
            Some(false) => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    /// Removes `key`. Returns `true` only if a live object was removed; an
    /// expired leftover is evicted but does not count.
    pub fn del(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        let now = self.now_ms();

        match write(self.shard(key)).remove(key) {
            Some(obj) if obj.is_live(now) => true,
            Some(_) => {
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => false,
        }
    }

    /// Removes each key in turn and returns how many were live.
    pub fn del_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> u64 {
        keys.iter().filter(|k| self.del((*k).as_ref())).count() as u64
    }

    /// Sets the absolute expiry of a live key, keeping its value.
    ///
    /// Returns `false` and creates nothing if the key is absent.
    pub fn expire_at(&self, key: &[u8], expires_at_ms: u64) -> bool {
        let now = self.now_ms();
        let mut data = write(self.shard(key));

        match data.get(key).map(|obj| obj.is_live(now)) {
            Some(true) => {
                if let Some(obj) = data.get_mut(key) {
                    obj.expires_at = Some(expires_at_ms);
                }
                true
            }
            Some(false) => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => false,
        }
    }

    /// Remaining time to live in whole seconds.
    ///
    /// - `Some(-1)` if the key exists without expiry
    /// - `Some(n)` with `n >= 0` if it expires in `n` seconds (rounded down)
    /// - `None` if the key is absent or expired
    pub fn ttl(&self, key: &[u8]) -> Option<i64> {
        let now = self.now_ms();
        let obj = self.lookup(key, now)?;
        Some(match obj.remaining_ms(now) {
            None => -1,
            Some(ms) => (ms / 1000) as i64,
        })
    }

    /// Number of entries physically held, expired leftovers included.
    pub fn len(&self) -> u64 {
        self.shards.iter().map(|s| read(s).len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every live entry as of a single instant.
    ///
    /// All shard read locks are held together while copying, so no write can
    /// land between two shards of the same snapshot. Values are `Bytes`, so
    /// the copy is reference-count bumps rather than payload copies, and the
    /// locks are released before the caller does anything slow with it.
    pub fn snapshot(&self) -> Snapshot {
        let guards: Vec<_> = self.shards.iter().map(read).collect();
        let now = self.now_ms();

        let entries = guards
            .iter()
            .flat_map(|data| data.iter())
            .filter(|(_, obj)| obj.is_live(now))
            .map(|(k, obj)| (k.clone(), obj.clone()))
            .collect();

        drop(guards);

        Snapshot {
            taken_at_ms: now,
            entries,
        }
    }

    /// Evicts every expired entry and returns how many were removed.
    ///
    /// Only entries that are already absent to readers are touched.
    pub fn cleanup_expired(&self) -> u64 {
        let now = self.now_ms();
        let mut removed = 0u64;

        for shard in &self.shards {
            let mut data = write(shard);
            let before = data.len();
            data.retain(|_, obj| obj.is_live(now));
            removed += (before - data.len()) as u64;
        }

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}
