//! Rebuild a history from a command log

use super::command::{decode_compound, BlobRef, Command};
use crate::timeline::{ActionKind, Blob, Bookmark, CoreAction, History, NodeId, NodeKind};
use crate::{Result, TicklineError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Everything recovered from a timeline log
#[derive(Debug)]
pub struct LoadedTimeline {
    /// Last recorded machine name
    pub name: Option<String>,
    /// Rebuilt tree, current pointer included; no open run
    pub history: History,
    /// First blob id not used by the log
    pub next_blob_id: u64,
}

#[derive(Default)]
struct Loader {
    name: Option<String>,
    history: History,
    /// Hex payloads by blob id, decoded lazily
    blobs: HashMap<u64, Arc<str>>,
    /// Legacy `arg` payloads
    args: HashMap<u64, Arc<str>>,
    next_blob_id: u64,
}

fn lazy_hex(hex_text: Arc<str>) -> Blob {
    Blob::lazy(move || {
        hex::decode(hex_text.as_bytes())
            .map_err(|e| TicklineError::FileFormat(format!("Bad blob payload: {e}")))
    })
}

impl Loader {
    fn resolve(&self, reference: BlobRef) -> Result<Option<Blob>> {
        match reference {
            BlobRef::None => Ok(None),
            BlobRef::Id(id) => self
                .blobs
                .get(&id)
                .map(|hex| Some(lazy_hex(Arc::clone(hex))))
                .ok_or_else(|| TicklineError::FileFormat(format!("Unknown blob {id}"))),
            BlobRef::Arg(id) => self
                .args
                .get(&id)
                .map(|hex| Some(lazy_hex(Arc::clone(hex))))
                .ok_or_else(|| TicklineError::FileFormat(format!("Unknown argument ${id}"))),
        }
    }

    fn required(&self, reference: BlobRef, what: &str) -> Result<Blob> {
        self.resolve(reference)?
            .ok_or_else(|| TicklineError::FileFormat(format!("Missing {what} blob")))
    }

    fn known(&self, id: u64) -> Result<NodeId> {
        let node = NodeId(id);
        if node.is_root() || !self.history.contains(node) {
            return Err(TicklineError::FileFormat(format!("Unknown event {id}")));
        }
        Ok(node)
    }

    fn add(&mut self, id: u64, ticks: u64, kind: ActionKind) -> Result<()> {
        self.history.insert_loaded(
            NodeId(id),
            ticks,
            NodeKind::Action(CoreAction::new(ticks, kind)),
        )
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Name(name) => self.name = Some(name),
            Command::Blob { id, hex } => {
                self.blobs.insert(id, hex.into());
                self.next_blob_id = self.next_blob_id.max(id + 1);
            }
            Command::Arg { id, hex } => {
                self.args.insert(id, hex.into());
            }
            Command::Compound { compressed, hex } => {
                for inner in decode_compound(compressed, &hex)? {
                    self.apply(inner)?;
                }
            }
            Command::Key {
                id,
                ticks,
                key,
                down,
            } => self.add(id, ticks, ActionKind::KeyPress { key, down })?,
            Command::Reset { id, ticks } => self.add(id, ticks, ActionKind::Reset)?,
            Command::Disc {
                id,
                ticks,
                drive,
                media,
            } => {
                let media = self.resolve(media)?;
                self.add(id, ticks, ActionKind::LoadDisc { drive, media })?
            }
            Command::Tape { id, ticks, media } => {
                let media = self.resolve(media)?;
                self.add(id, ticks, ActionKind::LoadTape { media })?
            }
            Command::State { id, ticks, state } => {
                let state = self.required(state, "state")?;
                self.add(id, ticks, ActionKind::LoadCoreState { state })?
            }
            Command::Version { id, ticks, version } => {
                self.add(id, ticks, ActionKind::CoreVersion { version })?
            }
            Command::Run { id, ticks, stop } => {
                if stop < ticks {
                    return Err(TicklineError::FileFormat(format!(
                        "Run {id} stops at {stop} before it starts at {ticks}"
                    )));
                }
                self.add(
                    id,
                    ticks,
                    ActionKind::RunUntil {
                        stop_ticks: stop,
                        samples: None,
                    },
                )?
            }
            Command::Bookmark {
                id,
                ticks,
                system,
                version,
                state,
                screen,
            } => {
                let bookmark = Bookmark {
                    system,
                    version,
                    state: self.required(state, "state")?,
                    screen: self.required(screen, "screen")?,
                };
                self.history
                    .insert_loaded(NodeId(id), ticks, NodeKind::Bookmark(bookmark))?
            }
            Command::Delete(id) => {
                let node = self.known(id)?;
                if !self.history.delete_bookmark(node)? {
                    return Err(TicklineError::FileFormat(format!(
                        "Event {id} is current and cannot be deleted"
                    )));
                }
            }
            Command::DeleteBranch(id) => {
                let node = self.known(id)?;
                if !self.history.delete_branch(node)? {
                    return Err(TicklineError::FileFormat(format!(
                        "Event {id} is on the current path and cannot be deleted"
                    )));
                }
            }
            Command::Current(None) => self.history.set_current(NodeId::ROOT)?,
            Command::Current(Some(id)) => {
                let node = self.known(id)?;
                self.history.set_current(node)?
            }
        }
        Ok(())
    }
}

/// Read a whole log
pub fn read_timeline(reader: impl BufRead) -> Result<LoadedTimeline> {
    let mut loader = Loader::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        Command::parse(&line)
            .and_then(|command| loader.apply(command))
            .map_err(|e| match e {
                TicklineError::FileFormat(msg) => {
                    TicklineError::FileFormat(format!("line {}: {msg}", index + 1))
                }
                other => other,
            })?;
    }
    Ok(LoadedTimeline {
        name: loader.name,
        history: loader.history,
        next_blob_id: loader.next_blob_id,
    })
}

/// Read the log stored at `path`
pub fn read_timeline_file(path: &Path) -> Result<LoadedTimeline> {
    let file = File::open(path)?;
    read_timeline(BufReader::new(file))
}
