//! Thread-shared audio buffer with waitable underrun signal
//!
//! The execution thread writes, the audio-delivery thread renders. Both sides
//! take one coarse lock; the producer blocks on a condition variable (with a
//! bounded timeout) until the consumer drains the buffer below its overrun
//! threshold.

use super::{AudioBuffer, AudioStats, PcmSource};
use crate::hardware::NativeSample;
use crate::Result;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Audio buffer shared between the execution and audio-delivery threads
#[derive(Debug)]
pub struct SharedAudioBuffer {
    buffer: Mutex<AudioBuffer>,
    /// Signalled whenever samples are consumed
    drained: Condvar,
}

impl SharedAudioBuffer {
    /// Create a shared fixed-capacity ring buffer
    pub fn new(capacity: usize, overrun_threshold: usize) -> Result<Self> {
        Ok(Self::from_buffer(AudioBuffer::with_capacity(
            capacity,
            overrun_threshold,
        )?))
    }

    /// Wrap an existing buffer
    pub fn from_buffer(buffer: AudioBuffer) -> Self {
        SharedAudioBuffer {
            buffer: Mutex::new(buffer),
            drained: Condvar::new(),
        }
    }

    /// Append samples produced by the core
    pub fn write(&self, samples: &[NativeSample]) {
        self.buffer.lock().write_all(samples);
    }

    /// Render to PCM; see [`AudioBuffer::render`]
    pub fn render(
        &self,
        volume: u8,
        out: &mut [u8],
        offset: usize,
        samples_requested: usize,
        reverse: bool,
    ) -> usize {
        let written = self
            .buffer
            .lock()
            .render(volume, out, offset, samples_requested, reverse);
        if written > 0 {
            self.drained.notify_all();
        }
        written
    }

    /// Discard samples without rendering; see [`AudioBuffer::advance`]
    pub fn advance(&self, n: usize) -> usize {
        let dropped = self.buffer.lock().advance(n);
        if dropped > 0 {
            self.drained.notify_all();
        }
        dropped
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        self.buffer.lock().clear();
        self.drained.notify_all();
    }

    /// Block up to `timeout` for the buffer to fall to or below its overrun
    /// threshold. Returns immediately if it already is. Returns `true` when
    /// the buffer is not overrun.
    pub fn wait_for_underrun(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut buffer = self.buffer.lock();
        while buffer.is_overrun() {
            if self.drained.wait_until(&mut buffer, deadline).timed_out() {
                break;
            }
        }
        !buffer.is_overrun()
    }

    /// Whether the buffer currently exceeds its overrun threshold
    pub fn is_overrun(&self) -> bool {
        self.buffer.lock().is_overrun()
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the turbo multiplier
    pub fn set_read_speed_multiplier(&self, multiplier: usize) {
        self.buffer.lock().set_read_speed_multiplier(multiplier);
    }

    /// Current turbo multiplier
    pub fn read_speed_multiplier(&self) -> usize {
        self.buffer.lock().read_speed_multiplier()
    }

    /// Monitoring counters
    pub fn stats(&self) -> AudioStats {
        self.buffer.lock().stats()
    }
}

impl PcmSource for SharedAudioBuffer {
    fn read_pcm(&self, buffer: &mut [u8], offset: usize, samples_requested: usize) -> usize {
        self.render(255, buffer, offset, samples_requested, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_not_overrun() {
        let shared = SharedAudioBuffer::new(16, 4).unwrap();
        shared.write(&[0; 4]);
        let start = Instant::now();
        assert!(shared.wait_for_underrun(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out_while_overrun() {
        let shared = SharedAudioBuffer::new(16, 4).unwrap();
        shared.write(&[0; 5]);
        assert!(!shared.wait_for_underrun(Duration::from_millis(20)));
    }

    #[test]
    fn test_consumer_releases_waiting_producer() {
        let shared = Arc::new(SharedAudioBuffer::new(64, 8).unwrap());
        shared.write(&[0; 20]);
        assert!(shared.is_overrun());

        let consumer = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let mut out = [0u8; 64];
            consumer.render(255, &mut out, 0, 16, false)
        });

        assert!(shared.wait_for_underrun(Duration::from_secs(5)));
        assert_eq!(handle.join().unwrap(), 16);
        assert_eq!(shared.len(), 4);
    }
}
