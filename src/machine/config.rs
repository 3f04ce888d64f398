//! Machine configuration
//!
//! Presets follow the usual split between interactive playback, which is
//! gated by the audio device, and headless replay, which runs flat out.

use crate::audio::DEFAULT_SAMPLE_RATE;
use crate::{Result, TicklineError};
use serde::{Deserialize, Serialize};

/// Tuning for one machine's execution loop and audio path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Native samples held by the main audio ring
    pub audio_capacity: usize,
    /// Buffered sample count above which emulation waits for playback
    pub overrun_threshold: usize,
    /// Retained reverse snapshots; 0 disables reverse playback
    pub snapshot_limit: usize,
    /// Tick step of the run request synthesized while idle
    pub idle_step_ticks: u64,
    /// Longest single core slice, in ticks
    pub max_slice_ticks: u64,
    /// Only advance the core when the audio buffer is not overrun
    pub throttle_to_audio: bool,
    /// Output device sample rate
    pub sample_rate: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::realtime()
    }
}

impl MachineConfig {
    /// Interactive playback gated by the audio device
    pub fn realtime() -> Self {
        MachineConfig {
            audio_capacity: 4096,
            overrun_threshold: 2048,
            snapshot_limit: 150,
            idle_step_ticks: 1000,
            max_slice_ticks: 80_000,
            throttle_to_audio: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Replay and tests: no audio gating
    pub fn headless() -> Self {
        MachineConfig {
            throttle_to_audio: false,
            ..Self::realtime()
        }
    }

    /// Parse a JSON document; missing fields take their realtime defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MachineConfig = serde_json::from_str(json)
            .map_err(|e| TicklineError::Config(format!("Malformed machine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field combinations
    pub fn validate(&self) -> Result<()> {
        if self.audio_capacity == 0 {
            return Err(TicklineError::Config(
                "audio_capacity must be positive".into(),
            ));
        }
        if self.overrun_threshold >= self.audio_capacity {
            return Err(TicklineError::Config(format!(
                "overrun_threshold {} must be below audio_capacity {}",
                self.overrun_threshold, self.audio_capacity
            )));
        }
        if self.idle_step_ticks == 0 || self.max_slice_ticks == 0 {
            return Err(TicklineError::Config(
                "idle_step_ticks and max_slice_ticks must be positive".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(TicklineError::Config("sample_rate must be positive".into()));
        }
        Ok(())
    }
}
