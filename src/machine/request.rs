//! Requests queued for the execution thread

use crate::timeline::{ActionKind, Blob, CoreAction};
use num_derive::FromPrimitive;

/// Something a caller asks the machine to do. The recorded result is a
/// [`CoreAction`], which may differ (a repeated key-down is recorded as
/// nothing at all).
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Press or release a key
    KeyPress {
        /// Key code
        key: u8,
        /// Pressed when `true`
        down: bool,
    },
    /// Reset the machine
    Reset,
    /// Insert or eject a disc
    LoadDisc {
        /// Drive index
        drive: u8,
        /// Disc image, `None` to eject
        media: Option<Blob>,
    },
    /// Insert or eject a tape
    LoadTape {
        /// Tape image, `None` to eject
        media: Option<Blob>,
    },
    /// Run until the given tick. Retried until reached.
    RunUntil {
        /// Target tick
        stop_ticks: u64,
    },
    /// Switch core version
    CoreVersion {
        /// New version
        version: u32,
    },
    /// Replace the whole core state
    LoadCoreState {
        /// Serialized state
        state: Blob,
    },
}

/// Wire tag of a request or action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum KindTag {
    /// Key press or release
    KeyPress = 1,
    /// Reset
    Reset = 2,
    /// Disc insert or eject
    LoadDisc = 3,
    /// Tape insert or eject
    LoadTape = 4,
    /// Run segment
    RunUntil = 5,
    /// Core version switch
    CoreVersion = 6,
    /// Whole-state load
    LoadCoreState = 7,
    /// Snapshot taken
    CreateSnapshot = 8,
    /// Snapshot dropped
    DeleteSnapshot = 9,
    /// Snapshot restored
    RevertToSnapshot = 10,
}

impl Request {
    /// Wire tag for this request
    pub fn tag(&self) -> KindTag {
        match self {
            Request::KeyPress { .. } => KindTag::KeyPress,
            Request::Reset => KindTag::Reset,
            Request::LoadDisc { .. } => KindTag::LoadDisc,
            Request::LoadTape { .. } => KindTag::LoadTape,
            Request::RunUntil { .. } => KindTag::RunUntil,
            Request::CoreVersion { .. } => KindTag::CoreVersion,
            Request::LoadCoreState { .. } => KindTag::LoadCoreState,
        }
    }

    /// The request that would reproduce `action`, or `None` for the
    /// snapshot kinds, which are managed by the execution loop itself
    pub fn from_action(action: &CoreAction) -> Option<Request> {
        let request = match &action.kind {
            ActionKind::KeyPress { key, down } => Request::KeyPress {
                key: *key,
                down: *down,
            },
            ActionKind::Reset => Request::Reset,
            ActionKind::LoadDisc { drive, media } => Request::LoadDisc {
                drive: *drive,
                media: media.clone(),
            },
            ActionKind::LoadTape { media } => Request::LoadTape {
                media: media.clone(),
            },
            ActionKind::RunUntil { stop_ticks, .. } => Request::RunUntil {
                stop_ticks: *stop_ticks,
            },
            ActionKind::CoreVersion { version } => Request::CoreVersion { version: *version },
            ActionKind::LoadCoreState { state } => Request::LoadCoreState {
                state: state.clone(),
            },
            ActionKind::CreateSnapshot { .. }
            | ActionKind::DeleteSnapshot { .. }
            | ActionKind::RevertToSnapshot { .. } => return None,
        };
        Some(request)
    }
}

impl ActionKind {
    /// Wire tag for this action kind
    pub fn tag(&self) -> KindTag {
        match self {
            ActionKind::KeyPress { .. } => KindTag::KeyPress,
            ActionKind::Reset => KindTag::Reset,
            ActionKind::LoadDisc { .. } => KindTag::LoadDisc,
            ActionKind::LoadTape { .. } => KindTag::LoadTape,
            ActionKind::RunUntil { .. } => KindTag::RunUntil,
            ActionKind::CoreVersion { .. } => KindTag::CoreVersion,
            ActionKind::LoadCoreState { .. } => KindTag::LoadCoreState,
            ActionKind::CreateSnapshot { .. } => KindTag::CreateSnapshot,
            ActionKind::DeleteSnapshot { .. } => KindTag::DeleteSnapshot,
            ActionKind::RevertToSnapshot { .. } => KindTag::RevertToSnapshot,
        }
    }
}
