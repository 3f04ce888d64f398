//! Hardware Core interface
//!
//! The instruction-level emulation is an external collaborator. The timeline
//! engine only needs a stepping engine that runs to a tick target, produces
//! native audio samples and supports state save/restore and snapshots.

pub mod reference;

pub use reference::ReferenceCore;

use crate::Result;
use bitflags::bitflags;

/// One emulator-native audio sample.
///
/// Packs three 4-bit channel amplitudes: A in bits 0-3, B in bits 4-7 and
/// C in bits 8-11. Bits 12-15 are ignored.
pub type NativeSample = u16;

bitflags! {
    /// Reasons a core slice can stop before reaching its tick target.
    ///
    /// Passed as a mask to [`HardwareCore::run_until`]; the same type is
    /// returned describing which of the masked reasons actually fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StopReasons: u8 {
        /// The caller's sample buffer reached the core's audio capacity
        const AUDIO_OVERRUN = 0x01;
        /// A vertical sync boundary was crossed
        const VSYNC = 0x02;
    }
}

/// Opaque stepping engine driven by the execution loop.
///
/// All calls are synchronous and happen on the machine's worker thread (or
/// while the machine is auto-paused).
pub trait HardwareCore: Send {
    /// Run until `stop_ticks` or until one of the masked stop reasons fires.
    /// Produced samples are appended to `samples`.
    fn run_until(
        &mut self,
        stop_ticks: u64,
        stop_reasons: StopReasons,
        samples: &mut Vec<NativeSample>,
    ) -> StopReasons;

    /// Press or release a key. Returns `false` if the key was already in the
    /// requested state (a no-op).
    fn key_press(&mut self, key: u8, down: bool) -> bool;

    /// Reset the machine.
    fn reset(&mut self);

    /// Insert (or eject with `None`) a disc image.
    fn load_disc(&mut self, drive: u8, media: Option<&[u8]>);

    /// Insert (or eject with `None`) a tape image.
    fn load_tape(&mut self, media: Option<&[u8]>);

    /// Replace the whole machine state. Fails on corrupt state.
    fn load_state(&mut self, state: &[u8]) -> Result<()>;

    /// Serialize the whole machine state.
    fn get_state(&self) -> Vec<u8>;

    /// Current screen contents.
    fn get_screen(&self) -> Vec<u8>;

    /// Overwrite the screen contents (used when restoring a bookmark).
    fn set_screen(&mut self, screen: &[u8]);

    /// Take an in-core snapshot tagged with `id`.
    fn create_snapshot(&mut self, id: u64) -> Result<()>;

    /// Drop the snapshot tagged with `id`.
    fn delete_snapshot(&mut self, id: u64) -> Result<()>;

    /// Restore the state captured by snapshot `id`. The snapshot is kept.
    fn revert_to_snapshot(&mut self, id: u64) -> Result<()>;

    /// Current emulated time.
    fn ticks(&self) -> u64;

    /// Output volume (0-255).
    fn volume(&self) -> u8;

    /// Set the output volume (0-255).
    fn set_volume(&mut self, volume: u8);

    /// Version of the core implementation.
    fn version(&self) -> u32;

    /// Switch core implementation version, keeping state.
    fn set_version(&mut self, version: u32) -> Result<()>;
}
