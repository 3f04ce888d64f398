//! Audio device integration using rodio
//!
//! Pulls interleaved 16-bit stereo PCM from a [`PcmSource`] (normally a
//! [`crate::Machine`]) on rodio's output thread.

use super::{PcmSource, BYTES_PER_SAMPLE};
use crate::{Result, TicklineError};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stereo samples fetched per refill
const BATCH_SAMPLES: usize = 512;

/// rodio source reading PCM from the timeline's audio path
struct PcmStreamSource {
    source: Arc<dyn PcmSource>,
    sample_rate: u32,
    finished: Arc<AtomicBool>,
    /// Decoded channel values of the current batch
    buffer: Vec<i16>,
    buffer_pos: usize,
    raw: Vec<u8>,
}

impl PcmStreamSource {
    fn new(source: Arc<dyn PcmSource>, sample_rate: u32, finished: Arc<AtomicBool>) -> Self {
        PcmStreamSource {
            source,
            sample_rate,
            finished,
            buffer: Vec::with_capacity(BATCH_SAMPLES * 2),
            buffer_pos: 0,
            raw: vec![0u8; BATCH_SAMPLES * BYTES_PER_SAMPLE],
        }
    }

    fn refill(&mut self) {
        let written = self.source.read_pcm(&mut self.raw, 0, BATCH_SAMPLES);
        self.buffer.clear();
        self.buffer_pos = 0;
        if written == 0 {
            // Underrun: emit one frame of silence to keep the stream alive
            self.buffer.extend_from_slice(&[0, 0]);
            return;
        }
        for chunk in self.raw[..written * BYTES_PER_SAMPLE].chunks_exact(2) {
            self.buffer.push(i16::from_le_bytes([chunk[0], chunk[1]]));
        }
    }
}

impl Source for PcmStreamSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for PcmStreamSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.buffer_pos >= self.buffer.len() {
            self.refill();
        }
        let sample = self.buffer.get(self.buffer_pos).copied().unwrap_or(0);
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start pulling from `source`
    pub fn new(source: Arc<dyn PcmSource>, sample_rate: u32) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            TicklineError::Io(std::io::Error::other(format!(
                "Failed to create audio stream: {e}"
            )))
        })?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| {
            TicklineError::Io(std::io::Error::other(format!(
                "Failed to create audio sink: {e}"
            )))
        })?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(PcmStreamSource::new(
            source,
            sample_rate,
            Arc::clone(&finished),
        ));
        tracing::info!(sample_rate, "audio device started");

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause playback
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback
    pub fn play(&self) {
        self.sink.play();
    }

    /// Signal that no more samples will be pulled
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
        self.sink.pause();
    }
}
