//! Deterministic reference core
//!
//! A minimal stepping engine with the timing shape of a 4MHz home computer:
//! one audio sample every [`TICKS_PER_SAMPLE`] ticks and a vertical sync every
//! [`TICKS_PER_FRAME`] ticks. Its output depends only on its inputs, which makes
//! it suitable for replay and snapshot tests.

use super::{HardwareCore, NativeSample, StopReasons};
use crate::{Result, TicklineError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Ticks between two produced audio samples (4MHz / 50kHz)
pub const TICKS_PER_SAMPLE: u64 = 80;

/// Ticks between two vertical sync events (4MHz / 50Hz)
pub const TICKS_PER_FRAME: u64 = 80_000;

/// Highest core version this implementation can switch to
pub const LATEST_VERSION: u32 = 2;

const STATE_MAGIC: &[u8; 4] = b"TLRC";
const SCREEN_SIZE: usize = 64;
const KEY_COUNT: usize = 128;
const DEFAULT_AUDIO_CAPACITY: usize = 1024;

/// Deterministic hardware core used for headless runs and tests
#[derive(Debug, Clone)]
pub struct ReferenceCore {
    ticks: u64,
    keys: [bool; KEY_COUNT],
    drives: [u32; 2],
    tape: u32,
    screen: Vec<u8>,
    volume: u8,
    version: u32,
    /// Samples per slice before `AUDIO_OVERRUN` fires
    audio_capacity: usize,
    snapshots: HashMap<u64, Vec<u8>>,
}

impl ReferenceCore {
    /// Create a core at tick 0 with all keys released
    pub fn new() -> Self {
        ReferenceCore {
            ticks: 0,
            keys: [false; KEY_COUNT],
            drives: [0; 2],
            tape: 0,
            screen: vec![0; SCREEN_SIZE],
            volume: 255,
            version: 1,
            audio_capacity: DEFAULT_AUDIO_CAPACITY,
            snapshots: HashMap::new(),
        }
    }

    /// Set how many samples one slice may produce before stopping with
    /// [`StopReasons::AUDIO_OVERRUN`]
    pub fn with_audio_capacity(mut self, capacity: usize) -> Self {
        self.audio_capacity = capacity.max(1);
        self
    }

    /// Whether `key` is currently held down
    pub fn is_key_down(&self, key: u8) -> bool {
        self.keys.get(key as usize).copied().unwrap_or(false)
    }

    /// Number of snapshots currently held
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    fn sample_at(&self, index: u64) -> NativeSample {
        let pressed = self.keys.iter().filter(|k| **k).count() as u16;
        let a = (index & 0x0F) as u16;
        let b = (pressed + (self.tape as u16)) & 0x0F;
        let c = (((self.ticks >> 12) as u16) ^ (self.drives[0] as u16)) & 0x0F;
        a | (b << 4) | (c << 8)
    }

    fn end_frame(&mut self) {
        let frame = self.ticks / TICKS_PER_FRAME;
        let idx = (frame as usize) % SCREEN_SIZE;
        self.screen[idx] = self.screen[idx].wrapping_add(1 + (frame as u8));
    }

    fn encode_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + SCREEN_SIZE);
        out.extend_from_slice(STATE_MAGIC);
        // Writes into a Vec cannot fail
        let _ = out.write_u32::<LittleEndian>(self.version);
        let _ = out.write_u64::<LittleEndian>(self.ticks);
        let mut bitmap = [0u8; KEY_COUNT / 8];
        for (i, down) in self.keys.iter().enumerate() {
            if *down {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        out.extend_from_slice(&bitmap);
        let _ = out.write_u32::<LittleEndian>(self.drives[0]);
        let _ = out.write_u32::<LittleEndian>(self.drives[1]);
        let _ = out.write_u32::<LittleEndian>(self.tape);
        let _ = out.write_u32::<LittleEndian>(self.screen.len() as u32);
        out.extend_from_slice(&self.screen);
        out
    }

    fn decode_state(&mut self, state: &[u8]) -> std::io::Result<()> {
        let mut cursor = Cursor::new(state);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != STATE_MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad state magic",
            ));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        let ticks = cursor.read_u64::<LittleEndian>()?;
        let mut bitmap = [0u8; KEY_COUNT / 8];
        cursor.read_exact(&mut bitmap)?;
        let drive_a = cursor.read_u32::<LittleEndian>()?;
        let drive_b = cursor.read_u32::<LittleEndian>()?;
        let tape = cursor.read_u32::<LittleEndian>()?;
        let screen_len = cursor.read_u32::<LittleEndian>()? as usize;
        if screen_len != SCREEN_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad screen size",
            ));
        }
        let mut screen = vec![0u8; screen_len];
        cursor.read_exact(&mut screen)?;

        self.version = version;
        self.ticks = ticks;
        for (i, key) in self.keys.iter_mut().enumerate() {
            *key = bitmap[i / 8] & (1 << (i % 8)) != 0;
        }
        self.drives = [drive_a, drive_b];
        self.tape = tape;
        self.screen = screen;
        Ok(())
    }
}

impl Default for ReferenceCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap order-sensitive checksum standing in for inserted media
fn media_checksum(media: Option<&[u8]>) -> u32 {
    match media {
        None => 0,
        Some(bytes) => bytes
            .iter()
            .fold(0x811C_9DC5u32, |acc, b| (acc ^ *b as u32).wrapping_mul(0x0100_0193)),
    }
}

impl HardwareCore for ReferenceCore {
    fn run_until(
        &mut self,
        stop_ticks: u64,
        stop_reasons: StopReasons,
        samples: &mut Vec<NativeSample>,
    ) -> StopReasons {
        let mut fired = StopReasons::empty();
        let mut produced = 0usize;

        while self.ticks < stop_ticks && fired.is_empty() {
            let next_sample = (self.ticks / TICKS_PER_SAMPLE + 1) * TICKS_PER_SAMPLE;
            let next_frame = (self.ticks / TICKS_PER_FRAME + 1) * TICKS_PER_FRAME;
            let target = stop_ticks.min(next_sample).min(next_frame);
            self.ticks = target;

            if target == next_sample {
                samples.push(self.sample_at(target / TICKS_PER_SAMPLE));
                produced += 1;
                if produced >= self.audio_capacity {
                    fired |= StopReasons::AUDIO_OVERRUN & stop_reasons;
                }
            }

            if target == next_frame {
                self.end_frame();
                fired |= StopReasons::VSYNC & stop_reasons;
            }
        }

        fired
    }

    fn key_press(&mut self, key: u8, down: bool) -> bool {
        match self.keys.get_mut(key as usize) {
            Some(slot) if *slot != down => {
                *slot = down;
                true
            }
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.keys = [false; KEY_COUNT];
        self.screen = vec![0; SCREEN_SIZE];
    }

    fn load_disc(&mut self, drive: u8, media: Option<&[u8]>) {
        if let Some(slot) = self.drives.get_mut(drive as usize) {
            *slot = media_checksum(media);
        }
    }

    fn load_tape(&mut self, media: Option<&[u8]>) {
        self.tape = media_checksum(media);
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        let mut restored = ReferenceCore::new();
        restored
            .decode_state(state)
            .map_err(|e| TicklineError::Core(format!("Corrupt core state: {e}")))?;
        *self = ReferenceCore {
            snapshots: std::mem::take(&mut self.snapshots),
            audio_capacity: self.audio_capacity,
            volume: self.volume,
            ..restored
        };
        Ok(())
    }

    fn get_state(&self) -> Vec<u8> {
        self.encode_state()
    }

    fn get_screen(&self) -> Vec<u8> {
        self.screen.clone()
    }

    fn set_screen(&mut self, screen: &[u8]) {
        let len = screen.len().min(SCREEN_SIZE);
        self.screen[..len].copy_from_slice(&screen[..len]);
    }

    fn create_snapshot(&mut self, id: u64) -> Result<()> {
        let state = self.encode_state();
        self.snapshots.insert(id, state);
        Ok(())
    }

    fn delete_snapshot(&mut self, id: u64) -> Result<()> {
        self.snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TicklineError::Core(format!("Unknown snapshot {id}")))
    }

    fn revert_to_snapshot(&mut self, id: u64) -> Result<()> {
        let state = self
            .snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| TicklineError::Core(format!("Unknown snapshot {id}")))?;
        self.decode_state(&state)
            .map_err(|e| TicklineError::Core(format!("Corrupt snapshot {id}: {e}")))
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn volume(&self) -> u8 {
        self.volume
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) -> Result<()> {
        if version == 0 || version > LATEST_VERSION {
            return Err(TicklineError::Core(format!(
                "Unsupported core version {version}"
            )));
        }
        self.version = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_until_produces_samples() {
        let mut core = ReferenceCore::new();
        let mut samples = Vec::new();
        let fired = core.run_until(800, StopReasons::empty(), &mut samples);
        assert!(fired.is_empty());
        assert_eq!(core.ticks(), 800);
        assert_eq!(samples.len(), 10);
    }

    #[test]
    fn test_vsync_stops_slice() {
        let mut core = ReferenceCore::new().with_audio_capacity(usize::MAX);
        let mut samples = Vec::new();
        let fired = core.run_until(200_000, StopReasons::VSYNC, &mut samples);
        assert_eq!(fired, StopReasons::VSYNC);
        assert_eq!(core.ticks(), TICKS_PER_FRAME);
    }

    #[test]
    fn test_audio_overrun_stops_slice() {
        let mut core = ReferenceCore::new().with_audio_capacity(4);
        let mut samples = Vec::new();
        let fired = core.run_until(10_000, StopReasons::AUDIO_OVERRUN, &mut samples);
        assert_eq!(fired, StopReasons::AUDIO_OVERRUN);
        assert_eq!(samples.len(), 4);
        assert_eq!(core.ticks(), 4 * TICKS_PER_SAMPLE);
    }

    #[test]
    fn test_duplicate_key_press_is_noop() {
        let mut core = ReferenceCore::new();
        assert!(core.key_press(5, true));
        assert!(!core.key_press(5, true));
        assert!(core.key_press(5, false));
    }

    #[test]
    fn test_state_roundtrip_and_corruption() {
        let mut core = ReferenceCore::new();
        core.key_press(3, true);
        core.run_until(5_000, StopReasons::empty(), &mut Vec::new());
        let state = core.get_state();

        let mut other = ReferenceCore::new();
        other.load_state(&state).unwrap();
        assert_eq!(other.ticks(), 5_000);
        assert!(other.is_key_down(3));

        let err = other.load_state(&state[..10]).unwrap_err();
        assert!(matches!(err, TicklineError::Core(_)));
        assert_eq!(other.ticks(), 5_000, "failed load must not mutate");
    }

    #[test]
    fn test_snapshot_revert() {
        let mut core = ReferenceCore::new();
        core.run_until(1_000, StopReasons::empty(), &mut Vec::new());
        core.create_snapshot(7).unwrap();
        core.run_until(9_000, StopReasons::empty(), &mut Vec::new());
        core.revert_to_snapshot(7).unwrap();
        assert_eq!(core.ticks(), 1_000);
        core.delete_snapshot(7).unwrap();
        assert!(core.revert_to_snapshot(7).is_err());
    }
}
