//! Branching, rewindable timeline engine for home-computer emulation
//!
//! Drives an opaque hardware core from a dedicated worker thread, records every
//! applied action in a branching history tree, bridges emulation-rate audio to
//! real-time playback, and mirrors the timeline to disk and over the network.
//!
//! # Features
//! - Branching history of actions and bookmarks with collapsing run segments
//! - Running / paused / reverse execution with periodic core snapshots
//! - Ring-buffered audio with overrun/underrun backpressure and turbo playback
//! - Append-only text command log with blob factoring and compaction
//! - Byte-stuffed binary wire protocol for remote mirroring
//!
//! # Crate feature flags
//! - `persist` (default): text command log reader/writer (`persist`)
//! - `wire` (default): binary protocol, server and remote client (`wire`)
//! - `playback` (opt-in): real-time audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ```no_run
//! use tickline::machine::{Machine, MachineConfig, Request};
//! use tickline::ReferenceCore;
//!
//! let machine = Machine::new("demo", Box::new(ReferenceCore::new()), MachineConfig::headless()).unwrap();
//! machine.push_request(Request::KeyPress { key: 12, down: true });
//! machine.start();
//! std::thread::sleep(std::time::Duration::from_millis(50));
//! machine.stop();
//! let mut pcm = [0u8; 4096];
//! let _written = machine.read_audio(&mut pcm, 0, 1024);
//! ```

#![warn(missing_docs)]

// Domain modules
pub mod audio; // Audio Ring Buffer
pub mod hardware; // Hardware Core interface
pub mod machine; // Execution Loop
#[cfg(feature = "persist")]
pub mod persist; // Text Command Log
pub mod timeline; // Timeline Engine
#[cfg(feature = "wire")]
pub mod wire; // Binary Wire Protocol

/// Error types for timeline, machine and codec operations
#[derive(thiserror::Error, Debug)]
pub enum TicklineError {
    /// Malformed, truncated or unknown wire message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or inconsistent timeline file
    #[error("File format error: {0}")]
    FileFormat(String),

    /// API misuse (deleting root, foreign nodes, unknown request kinds)
    #[error("Usage error: {0}")]
    Usage(String),

    /// Hardware core rejected an operation (corrupt state, unknown snapshot)
    #[error("Core error: {0}")]
    Core(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error from file or socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TicklineError {
    /// Converts a String into `TicklineError::Other`.
    ///
    /// Prefer the specific variants (`Usage`, `FileFormat`, `Protocol`) where
    /// the caller needs to discriminate the failure.
    fn from(msg: String) -> Self {
        TicklineError::Other(msg)
    }
}

impl From<&str> for TicklineError {
    fn from(msg: &str) -> Self {
        TicklineError::Other(msg.to_string())
    }
}

/// Result type for timeline operations
pub type Result<T> = std::result::Result<T, TicklineError>;

// Public API exports
pub use crate::audio::{AudioBuffer, SharedAudioBuffer};
pub use crate::hardware::{HardwareCore, ReferenceCore, StopReasons};
pub use crate::machine::{Machine, MachineConfig, Request, RunningState};
pub use crate::timeline::{ActionKind, Bookmark, CoreAction, History, NodeId};

#[cfg(feature = "playback")]
pub use crate::audio::AudioDevice;
