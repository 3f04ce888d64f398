//! Storage behind a timeline log
//!
//! [`TimelineFile`](super::TimelineFile) never touches the filesystem
//! directly: it reads, appends and rewrites through a [`TimelineStore`].
//! [`PathStore`] is the on-disk log; [`MemoryStore`] keeps the log in memory.

use super::file::{FileSink, LineSink, MemorySink};
use crate::{Result, TicklineError};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Backing storage of one timeline log
pub trait TimelineStore: Send {
    /// Human-readable location for diagnostics
    fn describe(&self) -> String;

    /// Filesystem path, when the store has one
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Reader positioned at the start of the log
    fn reader(&self) -> Result<Box<dyn BufRead>>;

    /// Empty the log and return a sink writing from its start
    fn create(&self) -> Result<Box<dyn LineSink>>;

    /// Sink appending after the existing content
    fn append(&self) -> Result<Box<dyn LineSink>>;

    /// Replace the whole log with what `write` produces. Readers see either
    /// the old log or the complete new one.
    fn replace(&self, write: &mut dyn FnMut(&mut dyn LineSink) -> Result<u64>) -> Result<u64>;
}

/// Log kept in a file on disk
#[derive(Debug, Clone)]
pub struct PathStore {
    path: PathBuf,
}

impl PathStore {
    /// Store at `path`; nothing is opened yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PathStore { path: path.into() }
    }
}

impl TimelineStore for PathStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn reader(&self) -> Result<Box<dyn BufRead>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn create(&self) -> Result<Box<dyn LineSink>> {
        Ok(Box::new(FileSink::create(&self.path)?))
    }

    fn append(&self) -> Result<Box<dyn LineSink>> {
        Ok(Box::new(FileSink::append(&self.path)?))
    }

    /// Written to a temporary file in the same directory, then renamed over
    /// the log
    fn replace(&self, write: &mut dyn FnMut(&mut dyn LineSink) -> Result<u64>) -> Result<u64> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        let written = {
            let mut sink = FileSink::from_file(temp.reopen()?);
            let written = write(&mut sink)?;
            sink.flush()?;
            written
        };
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| TicklineError::Io(e.error))?;
        Ok(written)
    }
}

/// Log held in memory; clones share the same lines
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    lines: MemorySink,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store starting out with `text`, one command per line
    pub fn from_text(text: &str) -> Self {
        let store = Self::new();
        store.lines.set_lines(text.lines().map(str::to_owned).collect());
        store
    }

    /// Current log as file text
    pub fn text(&self) -> String {
        self.lines.text()
    }

    /// Current log lines
    pub fn lines(&self) -> Vec<String> {
        self.lines.lines()
    }
}

impl TimelineStore for MemoryStore {
    fn describe(&self) -> String {
        "<memory>".to_owned()
    }

    fn reader(&self) -> Result<Box<dyn BufRead>> {
        Ok(Box::new(Cursor::new(self.lines.text().into_bytes())))
    }

    fn create(&self) -> Result<Box<dyn LineSink>> {
        self.lines.set_lines(Vec::new());
        Ok(Box::new(self.lines.clone()))
    }

    fn append(&self) -> Result<Box<dyn LineSink>> {
        Ok(Box::new(self.lines.clone()))
    }

    fn replace(&self, write: &mut dyn FnMut(&mut dyn LineSink) -> Result<u64>) -> Result<u64> {
        let mut fresh = MemorySink::new();
        let written = write(&mut fresh)?;
        self.lines.set_lines(fresh.lines());
        Ok(written)
    }
}
