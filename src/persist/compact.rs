//! Full rewrite of a timeline log from a live tree

use super::command::{encode_compound, Command};
use super::file::LineSink;
use super::store::{PathStore, TimelineStore};
use super::writer::{current_command, event_command};
use crate::timeline::{History, NodeId};
use crate::Result;
use std::path::Path;

/// Write the minimal command sequence recreating `history`.
///
/// All blobs go first, clustered in one compressed compound; events follow
/// in pre-order, and the log ends by restoring the current node. Returns the
/// next free blob id.
pub fn write_compacted(history: &History, name: Option<&str>, sink: &mut dyn LineSink) -> Result<u64> {
    let mut blobs = Vec::new();
    let mut events = Vec::new();
    let mut next_blob = 0u64;
    let mut cursor = NodeId::ROOT;

    for id in history.preorder() {
        let Some(node) = history.node(id) else {
            continue;
        };
        let event = event_command(node, |blob| {
            let blob_id = next_blob;
            next_blob += 1;
            blobs.push(Command::Blob {
                id: blob_id,
                hex: hex::encode(blob.get()?),
            });
            Ok(blob_id)
        })?;
        let Some(event) = event else {
            continue;
        };
        let parent = node.parent().unwrap_or(NodeId::ROOT);
        if parent != cursor {
            events.push(current_command(parent));
        }
        events.push(event);
        cursor = id;
    }
    events.push(current_command(history.current_id()));

    if let Some(name) = name {
        sink.write_line(&Command::Name(name.to_owned()).to_string())?;
    }
    if !blobs.is_empty() {
        sink.write_line(&encode_compound(&blobs, true).to_string())?;
    }
    for event in &events {
        sink.write_line(&event.to_string())?;
    }
    sink.flush()?;
    Ok(next_blob)
}

/// Atomically replace the file at `path` with a compacted log.
///
/// The new log is written to a temporary file in the same directory and
/// renamed over the old one. Returns the next free blob id.
pub fn compact_file(path: &Path, history: &History, name: Option<&str>) -> Result<u64> {
    compact_store(&PathStore::new(path), history, name)
}

/// Replace the log held by `store` with a compacted log of `history`
pub fn compact_store(store: &dyn TimelineStore, history: &History, name: Option<&str>) -> Result<u64> {
    let next_blob = store.replace(&mut |sink: &mut dyn LineSink| write_compacted(history, name, sink))?;
    tracing::info!(store = %store.describe(), nodes = history.len(), blobs = next_blob, "timeline compacted");
    Ok(next_blob)
}
