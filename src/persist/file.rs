//! Line sinks and the registry of open timeline files

use crate::{Result, TicklineError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Destination of command lines
pub trait LineSink: Send {
    /// Append one line; the sink adds the terminator
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Make everything written so far durable
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appending sink over a file
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create or truncate `path`
    pub fn create(path: &Path) -> Result<Self> {
        Ok(FileSink {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    /// Open `path` for appending
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(FileSink {
            writer: BufWriter::new(file),
        })
    }

    /// Wrap an already open file
    pub fn from_file(file: File) -> Self {
        FileSink {
            writer: BufWriter::new(file),
        }
    }
}

impl LineSink for FileSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink; clones share the same lines
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Replace everything written so far
    pub fn set_lines(&self, lines: Vec<String>) {
        *self.lines.lock() = lines;
    }

    /// Lines joined as file text
    pub fn text(&self) -> String {
        let mut text = String::new();
        for line in self.lines.lock().iter() {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

impl LineSink for MemorySink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines.lock().push(line.to_owned());
        Ok(())
    }
}

/// Set of timeline files currently open.
///
/// Two machines writing the same log would interleave commands, so a path
/// can be leased only once at a time. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    open: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FileRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease `path` until the returned value is dropped
    pub fn acquire(&self, path: &Path) -> Result<FileLease> {
        let key = normalize(path);
        let mut open = self.open.lock();
        if !open.insert(key.clone()) {
            return Err(TicklineError::Usage(format!(
                "{} is already open",
                path.display()
            )));
        }
        Ok(FileLease {
            registry: Arc::clone(&self.open),
            path: key,
        })
    }

    /// Whether `path` is currently leased
    pub fn is_open(&self, path: &Path) -> bool {
        self.open.lock().contains(&normalize(path))
    }

    /// Number of leased paths
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    /// Whether nothing is leased
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical directory plus file name, so a path that does not exist yet
/// maps to the same key it will have once created
fn normalize(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    parent
        .canonicalize()
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Registration of one open path; released on drop
#[derive(Debug)]
pub struct FileLease {
    registry: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl FileLease {
    /// Leased path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_second_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tl");
        std::fs::write(&path, "").unwrap();

        let registry = FileRegistry::new();
        let lease = registry.acquire(&path).unwrap();
        assert!(registry.is_open(&path));
        assert!(matches!(
            registry.acquire(&path),
            Err(TicklineError::Usage(_))
        ));
        drop(lease);
        assert!(registry.is_empty());
        assert!(registry.acquire(&path).is_ok());
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tl");
        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.write_line("name:a").unwrap();
            sink.flush().unwrap();
        }
        {
            let mut sink = FileSink::append(&path).unwrap();
            sink.write_line("reset:1,0").unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name:a\nreset:1,0\n");
    }
}
