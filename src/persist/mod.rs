//! Text command log persistence
//!
//! A timeline file is an event-sourced, append-only log: every history change
//! is appended as it happens, and [`compact_file`] rewrites the live tree as a
//! fresh minimal log. Binary payloads are always factored into `blob`
//! commands referenced by id.

pub mod command;
pub mod compact;
pub mod file;
pub mod reader;
pub mod store;
pub mod writer;

pub use command::{decode_compound, encode_compound, BlobRef, Command};
pub use compact::{compact_file, compact_store, write_compacted};
pub use file::{FileLease, FileRegistry, FileSink, LineSink, MemorySink};
pub use reader::{read_timeline, read_timeline_file, LoadedTimeline};
pub use store::{MemoryStore, PathStore, TimelineStore};
pub use writer::{CommandLog, LogObserver, SharedLog};

use crate::timeline::{History, HistoryObserver};
use crate::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// An open timeline log: its store, incremental writer and, for files on
/// disk, the registry lease
pub struct TimelineFile {
    store: Box<dyn TimelineStore>,
    log: SharedLog,
    _lease: Option<FileLease>,
}

impl TimelineFile {
    /// Create (or truncate) a log at `path` starting with `name`
    pub fn create(path: &Path, name: &str, registry: &FileRegistry) -> Result<Self> {
        let lease = registry.acquire(path)?;
        let mut file = Self::create_in(Box::new(PathStore::new(path)), name)?;
        file._lease = Some(lease);
        Ok(file)
    }

    /// Read the log at `path` and keep appending to it
    pub fn open(path: &Path, registry: &FileRegistry) -> Result<(Self, LoadedTimeline)> {
        let lease = registry.acquire(path)?;
        let (mut file, loaded) = Self::open_in(Box::new(PathStore::new(path)))?;
        file._lease = Some(lease);
        Ok((file, loaded))
    }

    /// Start a fresh log in `store` with `name`
    pub fn create_in(store: Box<dyn TimelineStore>, name: &str) -> Result<Self> {
        let mut log = CommandLog::new(store.create()?);
        log.write_name(name)?;
        tracing::info!(store = %store.describe(), "timeline file created");
        Ok(TimelineFile {
            store,
            log: Arc::new(Mutex::new(log)),
            _lease: None,
        })
    }

    /// Read the log held by `store` and keep appending to it
    pub fn open_in(store: Box<dyn TimelineStore>) -> Result<(Self, LoadedTimeline)> {
        let loaded = read_timeline(store.reader()?)?;
        let log = CommandLog::resume(
            store.append()?,
            loaded.next_blob_id,
            loaded.history.current_id(),
        );
        tracing::info!(
            store = %store.describe(),
            nodes = loaded.history.len(),
            current = %loaded.history.current_id(),
            "timeline file opened"
        );
        let file = TimelineFile {
            store,
            log: Arc::new(Mutex::new(log)),
            _lease: None,
        };
        Ok((file, loaded))
    }

    /// File location, for logs on disk
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Observer mirroring history changes into this file
    pub fn observer(&self) -> Box<dyn HistoryObserver> {
        Box::new(LogObserver::new(Arc::clone(&self.log)))
    }

    /// Append a `name` command
    pub fn write_name(&self, name: &str) -> Result<()> {
        self.log.lock().write_name(name)
    }

    /// Rewrite the log from `history` and continue appending to the result.
    /// The history must have no open run.
    pub fn compact(&self, history: &History, name: &str) -> Result<()> {
        let mut log = self.log.lock();
        log.flush()?;
        let next_blob = compact_store(self.store.as_ref(), history, Some(name))?;
        log.replace_sink(self.store.append()?, next_blob, history.current_id());
        Ok(())
    }
}
