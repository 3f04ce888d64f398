//! Incremental command log mirroring history changes

use super::command::{BlobRef, Command};
use super::file::LineSink;
use crate::timeline::{
    ActionKind, Blob, History, HistoryChange, HistoryChangeKind, HistoryNode, HistoryObserver,
    NodeId, NodeKind,
};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Append-only writer of timeline commands.
///
/// Tracks the node a reader of the log would consider current, so an added
/// node whose parent differs is preceded by a `current:` command.
pub struct CommandLog {
    sink: Box<dyn LineSink>,
    next_blob: u64,
    cursor: NodeId,
}

/// Log shared between a machine and the observer feeding it
pub type SharedLog = Arc<Mutex<CommandLog>>;

impl CommandLog {
    /// Start a new, empty log
    pub fn new(sink: Box<dyn LineSink>) -> Self {
        Self::resume(sink, 0, NodeId::ROOT)
    }

    /// Continue an existing log whose reader ends at `cursor` and whose blob
    /// ids below `next_blob` are taken
    pub fn resume(sink: Box<dyn LineSink>, next_blob: u64, cursor: NodeId) -> Self {
        CommandLog {
            sink,
            next_blob,
            cursor,
        }
    }

    /// Swap the underlying sink after the file was rewritten
    pub fn replace_sink(&mut self, sink: Box<dyn LineSink>, next_blob: u64, cursor: NodeId) {
        self.sink = sink;
        self.next_blob = next_blob;
        self.cursor = cursor;
    }

    /// Record the machine name
    pub fn write_name(&mut self, name: &str) -> Result<()> {
        self.emit(&Command::Name(name.to_owned()))?;
        self.sink.flush()
    }

    /// Mirror one history change
    pub fn record(&mut self, change: &HistoryChange<'_>) -> Result<()> {
        let node = change.node;
        match change.kind {
            HistoryChangeKind::Add => {
                let parent = node.parent().unwrap_or(NodeId::ROOT);
                if parent != self.cursor {
                    self.emit(&current_command(parent))?;
                }
                let mut blobs = Vec::new();
                let mut next_blob = self.next_blob;
                let event = event_command(node, |blob| {
                    let id = next_blob;
                    next_blob += 1;
                    blobs.push(Command::Blob {
                        id,
                        hex: hex::encode(blob.get()?),
                    });
                    Ok(id)
                })?;
                self.next_blob = next_blob;
                for blob in &blobs {
                    self.emit(blob)?;
                }
                if let Some(event) = event {
                    self.emit(&event)?;
                    self.cursor = node.id();
                }
            }
            HistoryChangeKind::SetCurrent => {
                self.emit(&current_command(node.id()))?;
                self.cursor = node.id();
            }
            HistoryChangeKind::DeleteBookmark => self.emit(&Command::Delete(node.id().0))?,
            HistoryChangeKind::DeleteBranch => self.emit(&Command::DeleteBranch(node.id().0))?,
        }
        self.sink.flush()
    }

    /// Flush buffered lines
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    fn emit(&mut self, command: &Command) -> Result<()> {
        self.sink.write_line(&command.to_string())
    }
}

pub(crate) fn current_command(id: NodeId) -> Command {
    if id.is_root() {
        Command::Current(None)
    } else {
        Command::Current(Some(id.0))
    }
}

fn blob_ref(blob: Option<&Blob>, store: &mut impl FnMut(&Blob) -> Result<u64>) -> Result<BlobRef> {
    match blob {
        Some(blob) => Ok(BlobRef::Id(store(blob)?)),
        None => Ok(BlobRef::None),
    }
}

/// Command recreating `node`, storing its binary payloads through `store`.
/// Returns `None` for the root.
pub(crate) fn event_command(
    node: &HistoryNode,
    mut store: impl FnMut(&Blob) -> Result<u64>,
) -> Result<Option<Command>> {
    let id = node.id().0;
    let ticks = node.ticks();
    let command = match node.kind() {
        NodeKind::Root => return Ok(None),
        NodeKind::Bookmark(bookmark) => Command::Bookmark {
            id,
            ticks,
            system: bookmark.system,
            version: bookmark.version,
            state: blob_ref(Some(&bookmark.state), &mut store)?,
            screen: blob_ref(Some(&bookmark.screen), &mut store)?,
        },
        NodeKind::Action(action) => match &action.kind {
            ActionKind::KeyPress { key, down } => Command::Key {
                id,
                ticks,
                key: *key,
                down: *down,
            },
            ActionKind::Reset => Command::Reset { id, ticks },
            ActionKind::LoadDisc { drive, media } => Command::Disc {
                id,
                ticks,
                drive: *drive,
                media: blob_ref(media.as_ref(), &mut store)?,
            },
            ActionKind::LoadTape { media } => Command::Tape {
                id,
                ticks,
                media: blob_ref(media.as_ref(), &mut store)?,
            },
            ActionKind::RunUntil { stop_ticks, .. } => Command::Run {
                id,
                ticks,
                stop: *stop_ticks,
            },
            ActionKind::CoreVersion { version } => Command::Version {
                id,
                ticks,
                version: *version,
            },
            ActionKind::LoadCoreState { state } => Command::State {
                id,
                ticks,
                state: blob_ref(Some(state), &mut store)?,
            },
            ActionKind::CreateSnapshot { .. }
            | ActionKind::DeleteSnapshot { .. }
            | ActionKind::RevertToSnapshot { .. } => return Ok(None),
        },
    };
    Ok(Some(command))
}

/// History observer appending every change to a shared log
pub struct LogObserver {
    log: SharedLog,
}

impl LogObserver {
    /// Observer writing to `log`
    pub fn new(log: SharedLog) -> Self {
        LogObserver { log }
    }
}

impl HistoryObserver for LogObserver {
    fn on_history_change(&mut self, _history: &History, change: &HistoryChange<'_>) -> Result<()> {
        self.log.lock().record(change)
    }
}
