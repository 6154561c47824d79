//! Persistence Module
//!
//! A rewrite dumps the whole keyspace to durable storage:
//!
//! ```text
//!   BGREWRITEAOF
//!        │
//!        ▼
//! ┌──────────────────┐  all shard read locks   ┌────────────────┐
//! │   Persistence    │────────────────────────>│ StorageEngine  │
//! │   ::rewrite()    │<──── Snapshot ──────────│  ::snapshot()  │
//! └────────┬─────────┘   (locks released)      └────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   SnapshotSink   │  e.g. AofFile: temp file, fsync, rename
//! └──────────────────┘
//! ```
//!
//! The store is locked only while the snapshot is copied; the slow write
//! happens afterwards, so client commands keep running during the I/O. A
//! failed write is returned to the caller and leaves both the keyspace and
//! the previous file untouched.

pub mod aof;

pub use aof::{load_aof, AofFile};

use crate::storage::{Snapshot, StorageEngine};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rewrite already in progress")]
    RewriteInProgress,

    #[error("corrupt append only file at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}

/// Durable destination for a keyspace snapshot.
///
/// Implementations must either store the whole snapshot or return an error;
/// returning `Ok` for a partial write is a bug.
pub trait SnapshotSink: Send + Sync + fmt::Debug {
    /// Persists `snapshot` and returns the number of bytes written.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, PersistenceError>;
}

/// Outcome of a successful rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    pub keys: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub rewrites: u64,
    pub failures: u64,
    pub in_progress: bool,
}

/// Coordinates keyspace snapshots with a [`SnapshotSink`].
#[derive(Debug)]
pub struct Persistence {
    storage: Arc<StorageEngine>,
    sink: Box<dyn SnapshotSink>,
    in_progress: AtomicBool,
    rewrites: AtomicU64,
    failures: AtomicU64,
}

/// Clears the in-progress flag however the rewrite ends.
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Persistence {
    pub fn new(storage: Arc<StorageEngine>, sink: impl SnapshotSink + 'static) -> Self {
        Self {
            storage,
            sink: Box::new(sink),
            in_progress: AtomicBool::new(false),
            rewrites: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Dumps every live key to the sink.
    ///
    /// Only one rewrite runs at a time; a second caller gets
    /// [`PersistenceError::RewriteInProgress`] instead of waiting.
    pub fn rewrite(&self) -> Result<RewriteReport, PersistenceError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PersistenceError::RewriteInProgress);
        }
        let _guard = InProgress(&self.in_progress);

        let started = Instant::now();
        let snapshot = self.storage.snapshot();

        match self.write_off_runtime(&snapshot) {
            Ok(bytes) => {
                self.rewrites.fetch_add(1, Ordering::Relaxed);
                let report = RewriteReport {
                    keys: snapshot.len(),
                    bytes,
                    elapsed: started.elapsed(),
                };
                info!(
                    keys = report.keys,
                    bytes = report.bytes,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Append only file rewrite complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, keys = snapshot.len(), "Append only file rewrite failed");
                Err(e)
            }
        }
    }

    /// Runs the blocking sink write. On a multi-threaded tokio runtime the
    /// worker is handed over to the scheduler first, so other sessions keep
    /// being served while the file is written.
    fn write_off_runtime(&self, snapshot: &Snapshot) -> Result<u64, PersistenceError> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.sink.write_snapshot(snapshot))
            }
            _ => self.sink.write_snapshot(snapshot),
        }
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            rewrites: self.rewrites.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Acquire),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySink;
    use super::*;
    use bytes::Bytes;
    use std::sync::Barrier;

    #[test]
    fn test_rewrite_reports_live_keys() {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("a"), "1");
        storage.set(Bytes::from("b"), "2");

        let sink = Arc::new(MemorySink::default());
        let persistence = Persistence::new(Arc::clone(&storage), Arc::clone(&sink));

        let report = persistence.rewrite().unwrap();
        assert_eq!(report.keys, 2);
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
        assert_eq!(
            persistence.stats(),
            PersistenceStats {
                rewrites: 1,
                failures: 0,
                in_progress: false
            }
        );
    }

    #[test]
    fn test_failed_write_is_reported_and_store_untouched() {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("a"), "1");

        let persistence = Persistence::new(Arc::clone(&storage), Arc::new(MemorySink::failing()));

        assert!(matches!(persistence.rewrite(), Err(PersistenceError::Io(_))));
        assert_eq!(persistence.stats().failures, 1);
        assert!(!persistence.stats().in_progress);
        assert!(storage.get(b"a").is_some());

        // The flag was released, so the next attempt runs (and fails) again.
        assert!(matches!(persistence.rewrite(), Err(PersistenceError::Io(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rewrite_inside_multi_thread_runtime() {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("a"), "1");
        let sink = Arc::new(MemorySink::default());
        let persistence = Persistence::new(Arc::clone(&storage), Arc::clone(&sink));

        let report = persistence.rewrite().unwrap();
        assert_eq!(report.keys, 1);
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_inside_current_thread_runtime() {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("a"), "1");
        let persistence = Persistence::new(storage, Arc::new(MemorySink::default()));

        assert_eq!(persistence.rewrite().unwrap().keys, 1);
    }

    /// Blocks inside the write until released, to hold a rewrite open.
    #[derive(Debug)]
    struct GateSink {
        entered: Barrier,
        release: Barrier,
    }

    impl SnapshotSink for Arc<GateSink> {
        fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, PersistenceError> {
            self.entered.wait();
            self.release.wait();
            Ok(snapshot.len() as u64)
        }
    }

    #[test]
    fn test_concurrent_rewrite_is_refused() {
        let storage = Arc::new(StorageEngine::new());
        let gate = Arc::new(GateSink {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let persistence = Arc::new(Persistence::new(Arc::clone(&storage), Arc::clone(&gate)));

        let first = {
            let persistence = Arc::clone(&persistence);
            std::thread::spawn(move || persistence.rewrite())
        };

        gate.entered.wait();
        assert!(matches!(
            persistence.rewrite(),
            Err(PersistenceError::RewriteInProgress)
        ));

        // The store stays writable while the sink is busy.
        storage.set(Bytes::from("during"), "v");

        gate.release.wait();
        assert!(first.join().unwrap().is_ok());
        assert!(!persistence.stats().in_progress);
    }
}
