//! Recorded core actions
//!
//! An action is the already-applied result of a request. Every kind is a
//! variant of [`ActionKind`]; codecs and the execution loop match on it
//! exhaustively.

use super::Blob;
use crate::hardware::NativeSample;

/// Action applied to the hardware core at a given tick
#[derive(Debug, Clone, PartialEq)]
pub struct CoreAction {
    /// Tick at which the action was applied (start tick for runs)
    pub ticks: u64,
    /// What was applied
    pub kind: ActionKind,
}

/// Closed set of action kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Key pressed (`down`) or released
    KeyPress {
        /// Key code
        key: u8,
        /// Pressed when `true`
        down: bool,
    },
    /// Machine reset
    Reset,
    /// Disc inserted into `drive`, or ejected when `media` is `None`
    LoadDisc {
        /// Drive index
        drive: u8,
        /// Disc image
        media: Option<Blob>,
    },
    /// Tape inserted, or ejected when `media` is `None`
    LoadTape {
        /// Tape image
        media: Option<Blob>,
    },
    /// Continuous run from `ticks` to `stop_ticks`
    RunUntil {
        /// Tick the run ended at
        stop_ticks: u64,
        /// Samples produced by the run; stripped when recorded in a history
        samples: Option<Vec<NativeSample>>,
    },
    /// Core implementation version switch
    CoreVersion {
        /// New version
        version: u32,
    },
    /// Whole-state load
    LoadCoreState {
        /// Serialized core state
        state: Blob,
    },
    /// In-core snapshot taken
    CreateSnapshot {
        /// Snapshot id
        id: u64,
    },
    /// In-core snapshot dropped
    DeleteSnapshot {
        /// Snapshot id
        id: u64,
    },
    /// Core restored from a snapshot
    RevertToSnapshot {
        /// Snapshot id
        id: u64,
    },
}

impl CoreAction {
    /// Create an action at `ticks`
    pub fn new(ticks: u64, kind: ActionKind) -> Self {
        CoreAction { ticks, kind }
    }

    /// Convenience constructor for a run segment without samples
    pub fn run_until(start_ticks: u64, stop_ticks: u64) -> Self {
        CoreAction::new(
            start_ticks,
            ActionKind::RunUntil {
                stop_ticks,
                samples: None,
            },
        )
    }

    /// Last tick covered by this action
    pub fn end_ticks(&self) -> u64 {
        match &self.kind {
            ActionKind::RunUntil { stop_ticks, .. } => *stop_ticks,
            _ => self.ticks,
        }
    }

    /// Copy of this action without any audio payload
    pub fn without_samples(&self) -> CoreAction {
        match &self.kind {
            ActionKind::RunUntil { stop_ticks, .. } => CoreAction::run_until(self.ticks, *stop_ticks),
            _ => self.clone(),
        }
    }
}

impl ActionKind {
    /// Whether this is a run segment
    pub fn is_run_until(&self) -> bool {
        matches!(self, ActionKind::RunUntil { .. })
    }

    /// Whether this manages reverse-playback snapshots; such actions are
    /// mirrored to observers but never recorded in a history
    pub fn is_snapshot(&self) -> bool {
        match self {
            ActionKind::CreateSnapshot { .. }
            | ActionKind::DeleteSnapshot { .. }
            | ActionKind::RevertToSnapshot { .. } => true,
            ActionKind::KeyPress { .. }
            | ActionKind::Reset
            | ActionKind::LoadDisc { .. }
            | ActionKind::LoadTape { .. }
            | ActionKind::RunUntil { .. }
            | ActionKind::CoreVersion { .. }
            | ActionKind::LoadCoreState { .. } => false,
        }
    }

    /// Short name used in logs and listings
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::KeyPress { .. } => "key",
            ActionKind::Reset => "reset",
            ActionKind::LoadDisc { .. } => "disc",
            ActionKind::LoadTape { .. } => "tape",
            ActionKind::RunUntil { .. } => "run",
            ActionKind::CoreVersion { .. } => "version",
            ActionKind::LoadCoreState { .. } => "state",
            ActionKind::CreateSnapshot { .. } => "create-snapshot",
            ActionKind::DeleteSnapshot { .. } => "delete-snapshot",
            ActionKind::RevertToSnapshot { .. } => "revert-snapshot",
        }
    }
}
