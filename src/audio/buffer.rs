//! Ring buffer of native audio samples
//!
//! Two modes:
//! - Fixed capacity: ring semantics, the oldest unread sample is overwritten
//!   when a write finds the buffer full.
//! - Unbounded: storage doubles when full (used by reverse snapshots, which
//!   must keep every sample produced since the snapshot was taken).
//!
//! Positions are absolute counters; storage is indexed through a power-of-two
//! mask so wrap-around never needs a modulo.

use super::{stereo_levels, BYTES_PER_SAMPLE};
use crate::hardware::NativeSample;
use crate::{Result, TicklineError};

const INITIAL_UNBOUNDED_CAPACITY: usize = 1024;

/// Counters for monitoring buffer health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    /// Unread samples overwritten because the ring was full
    pub overwritten: usize,
    /// Render calls that delivered fewer samples than requested
    pub underruns: usize,
    /// Native samples consumed by rendering
    pub rendered: usize,
}

/// Store of raw native samples with read/write cursors
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    storage: Vec<NativeSample>,
    /// `storage.len() - 1`; storage length is always a power of two
    mask: usize,
    /// Total samples ever consumed (rendered, advanced or overwritten)
    read_pos: usize,
    /// Total samples ever written, minus samples taken back by reverse reads
    write_pos: usize,
    bounded: bool,
    overrun_threshold: usize,
    read_speed: usize,
    stats: AudioStats,
}

impl AudioBuffer {
    /// Create a fixed-capacity ring buffer.
    /// Capacity is rounded up to the next power of 2.
    ///
    /// # Errors
    ///
    /// Returns an error if capacity is 0 or the threshold does not fit in it.
    pub fn with_capacity(requested_capacity: usize, overrun_threshold: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(TicklineError::Config(
                "Audio buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();
        if overrun_threshold >= capacity {
            return Err(TicklineError::Config(format!(
                "Overrun threshold {overrun_threshold} must be below capacity {capacity}"
            )));
        }
        Ok(Self::build(capacity, true, overrun_threshold))
    }

    /// Create an unbounded buffer that grows instead of overwriting.
    pub fn unbounded() -> Self {
        Self::build(INITIAL_UNBOUNDED_CAPACITY, false, usize::MAX)
    }

    fn build(capacity: usize, bounded: bool, overrun_threshold: usize) -> Self {
        AudioBuffer {
            storage: vec![0; capacity],
            mask: capacity - 1,
            read_pos: 0,
            write_pos: 0,
            bounded,
            overrun_threshold,
            read_speed: 1,
            stats: AudioStats::default(),
        }
    }

    /// Number of buffered, unread samples
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Whether there is nothing left to read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current storage capacity in samples
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Buffered-sample count above which the buffer counts as overrun
    pub fn overrun_threshold(&self) -> usize {
        self.overrun_threshold
    }

    /// Change the overrun threshold
    pub fn set_overrun_threshold(&mut self, threshold: usize) {
        self.overrun_threshold = threshold;
    }

    /// Whether the buffered-sample count exceeds the overrun threshold
    pub fn is_overrun(&self) -> bool {
        self.len() > self.overrun_threshold
    }

    /// Native samples consumed per rendered sample
    pub fn read_speed_multiplier(&self) -> usize {
        self.read_speed
    }

    /// Set the turbo multiplier (clamped to at least 1)
    pub fn set_read_speed_multiplier(&mut self, multiplier: usize) {
        self.read_speed = multiplier.max(1);
    }

    /// Monitoring counters
    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// Append one native sample
    pub fn write(&mut self, sample: NativeSample) {
        if self.len() == self.storage.len() {
            if self.bounded {
                self.read_pos += 1;
                self.stats.overwritten += 1;
            } else {
                self.grow();
            }
        }
        let idx = self.write_pos & self.mask;
        self.storage[idx] = sample;
        self.write_pos += 1;
    }

    /// Append a batch of native samples
    pub fn write_all(&mut self, samples: &[NativeSample]) {
        for &sample in samples {
            self.write(sample);
        }
    }

    fn grow(&mut self) {
        let capacity = self.storage.len() * 2;
        let mut storage = vec![0; capacity];
        let len = self.len();
        for (i, slot) in storage.iter_mut().take(len).enumerate() {
            *slot = self.storage[(self.read_pos + i) & self.mask];
        }
        self.storage = storage;
        self.mask = capacity - 1;
        self.read_pos = 0;
        self.write_pos = len;
    }

    /// Render buffered samples to interleaved little-endian 16-bit stereo PCM.
    ///
    /// Forward reads consume from the read cursor; reverse reads consume from
    /// the most recently written end backwards. Only whole 4-byte samples are
    /// written. Returns the number of samples written.
    pub fn render(
        &mut self,
        volume: u8,
        out: &mut [u8],
        offset: usize,
        samples_requested: usize,
        reverse: bool,
    ) -> usize {
        let room = out.len().saturating_sub(offset) / BYTES_PER_SAMPLE;
        let speed = self.read_speed;
        let count = samples_requested.min(room).min(self.len() / speed);

        for i in 0..count {
            let pos = if reverse {
                self.write_pos - 1 - i * speed
            } else {
                self.read_pos + i * speed
            };
            let (left, right) = stereo_levels(self.storage[pos & self.mask], volume);
            let at = offset + i * BYTES_PER_SAMPLE;
            out[at..at + 2].copy_from_slice(&left.to_le_bytes());
            out[at + 2..at + 4].copy_from_slice(&right.to_le_bytes());
        }

        let consumed = count * speed;
        if reverse {
            self.write_pos -= consumed;
        } else {
            self.read_pos += consumed;
        }
        self.stats.rendered += consumed;
        if count < samples_requested && room > 0 {
            self.stats.underruns += 1;
        }
        count
    }

    /// Discard up to `n` rendered-sample slots (scaled by the read speed)
    /// without rendering them. Returns the number of native samples dropped.
    pub fn advance(&mut self, n: usize) -> usize {
        let dropped = n.saturating_mul(self.read_speed).min(self.len());
        self.read_pos += dropped;
        dropped
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.read_pos = self.write_pos;
    }
}
