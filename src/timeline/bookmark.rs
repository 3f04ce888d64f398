//! Bookmarks and lazily materialized binary blobs

use crate::{Result, TicklineError};
use std::fmt;
use std::sync::{Arc, OnceLock};

type BlobLoader = Box<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

struct BlobInner {
    bytes: OnceLock<Vec<u8>>,
    loader: Option<BlobLoader>,
}

/// Opaque, cheaply clonable byte blob.
///
/// A blob is either resident or backed by a loader that runs on first access
/// (for example, decoding a blob read from a timeline file only when a
/// bookmark is actually restored).
#[derive(Clone)]
pub struct Blob {
    inner: Arc<BlobInner>,
}

impl Blob {
    /// Resident blob
    pub fn new(bytes: Vec<u8>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes);
        Blob {
            inner: Arc::new(BlobInner {
                bytes: cell,
                loader: None,
            }),
        }
    }

    /// Blob materialized by `loader` on first access
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Blob {
            inner: Arc::new(BlobInner {
                bytes: OnceLock::new(),
                loader: Some(Box::new(loader)),
            }),
        }
    }

    /// Bytes of the blob, materializing it if needed
    pub fn get(&self) -> Result<&[u8]> {
        if let Some(bytes) = self.inner.bytes.get() {
            return Ok(bytes.as_slice());
        }
        let loader = self
            .inner
            .loader
            .as_ref()
            .ok_or_else(|| TicklineError::Other("Blob has neither bytes nor loader".into()))?;
        let loaded = loader()?;
        Ok(self.inner.bytes.get_or_init(|| loaded).as_slice())
    }

    /// Owned copy of the bytes
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.get().map(<[u8]>::to_vec)
    }

    /// Whether the bytes are already resident
    pub fn is_loaded(&self) -> bool {
        self.inner.bytes.get().is_some()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob::new(bytes)
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (self.get(), other.get()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.bytes.get() {
            Some(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            None => f.write_str("Blob(deferred)"),
        }
    }
}

/// Saved full machine state attached to a bookmark node
#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    /// Written automatically (e.g. on close) rather than by the user
    pub system: bool,
    /// Core version that produced `state`
    pub version: u32,
    /// Serialized core state
    pub state: Blob,
    /// Screen contents at the time of the bookmark
    pub screen: Blob,
}

impl Bookmark {
    /// Create a bookmark from resident blobs
    pub fn new(system: bool, version: u32, state: Vec<u8>, screen: Vec<u8>) -> Self {
        Bookmark {
            system,
            version,
            state: Blob::new(state),
            screen: Blob::new(screen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lazy_blob_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let blob = Blob::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        });
        assert!(!blob.is_loaded());
        assert_eq!(blob.get().unwrap(), &[1, 2, 3]);
        assert_eq!(blob.get().unwrap(), &[1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(blob.is_loaded());
    }

    #[test]
    fn test_lazy_blob_error_is_retried() {
        let blob = Blob::lazy(|| Err(TicklineError::FileFormat("bad hex".into())));
        assert!(blob.get().is_err());
        assert!(blob.get().is_err());
        assert!(!blob.is_loaded());
    }

    #[test]
    fn test_blob_equality_by_content() {
        let a = Blob::new(vec![9, 9]);
        let b = Blob::lazy(|| Ok(vec![9, 9]));
        assert_eq!(a, b);
        assert_ne!(a, Blob::new(vec![9]));
    }
}
