//! Audio device seams
//!
//! Microphone and speaker hardware are external collaborators. Sessions talk
//! to them through [`MicrophoneSource`] and [`SpeakerSink`]; this module also
//! provides a test-tone source and in-memory devices for simulations.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::constants::SAMPLE_RATE_HZ;
use crate::error::DeviceError;

/// Produces 16-bit mono samples at [`SAMPLE_RATE_HZ`] on demand
pub trait MicrophoneSource: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self);

    /// Copy available samples into `buf`, returning how many were written.
    /// Must not block; returns 0 when nothing is ready.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError>;
}

/// Accepts 16-bit mono samples for playback
pub trait SpeakerSink: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self);

    /// Queue samples for playback, returning how many were accepted
    fn play(&mut self, samples: &[i16]) -> Result<usize, DeviceError>;
}

/// Sine test tone, produced in real time: a read returns only the samples
/// that would have been captured since [`MicrophoneSource::start`]
pub struct ToneSource {
    frequency_hz: f32,
    amplitude: i16,
    phase: f32,
    started: Option<Instant>,
    produced: u64,
}

impl ToneSource {
    pub fn new(frequency_hz: f32, amplitude: i16) -> Self {
        Self {
            frequency_hz,
            amplitude,
            phase: 0.0,
            started: None,
            produced: 0,
        }
    }
}

impl MicrophoneSource for ToneSource {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.started = Some(Instant::now());
        self.produced = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError> {
        let Some(started) = self.started else {
            return Ok(0);
        };
        let due = started.elapsed().as_micros() as u64 * u64::from(SAMPLE_RATE_HZ) / 1_000_000;
        let count = (due.saturating_sub(self.produced) as usize).min(buf.len());

        let step = self.frequency_hz * 2.0 * std::f32::consts::PI / SAMPLE_RATE_HZ as f32;
        for sample in buf[..count].iter_mut() {
            *sample = (self.phase.sin() * self.amplitude as f32) as i16;
            self.phase = (self.phase + step) % (2.0 * std::f32::consts::PI);
        }
        self.produced += count as u64;
        Ok(count)
    }
}

#[derive(Default)]
struct SourceState {
    queue: VecDeque<i16>,
    running: bool,
    starts: usize,
    fail_next: Option<String>,
}

/// Microphone fed from memory. Clones share the same queue, so a test can
/// keep a handle after boxing one into a session.
#[derive(Clone, Default)]
pub struct BufferSource {
    inner: Arc<Mutex<SourceState>>,
}

impl BufferSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, samples: &[i16]) {
        self.inner.lock().queue.extend(samples.iter().copied());
    }

    /// Make the next read fail with a device error
    pub fn fail_next(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn start_count(&self) -> usize {
        self.inner.lock().starts
    }

    pub fn buffered(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl MicrophoneSource for BufferSource {
    fn start(&mut self) -> Result<(), DeviceError> {
        let mut state = self.inner.lock();
        state.running = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.lock().running = false;
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError> {
        let mut state = self.inner.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(DeviceError::Microphone(message));
        }
        let count = buf.len().min(state.queue.len());
        for (slot, sample) in buf.iter_mut().zip(state.queue.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }
}

#[derive(Default)]
struct SinkState {
    played: Vec<i16>,
    running: bool,
    fail_next: Option<String>,
}

/// Speaker that records everything played. Clones share the recording.
#[derive(Clone, Default)]
pub struct BufferSink {
    inner: Arc<Mutex<SinkState>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<i16> {
        self.inner.lock().played.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Make the next play call fail with a device error
    pub fn fail_next(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }
}

impl SpeakerSink for BufferSink {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.inner.lock().running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.lock().running = false;
    }

    fn play(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        let mut state = self.inner.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(DeviceError::Speaker(message));
        }
        state.played.extend_from_slice(samples);
        Ok(samples.len())
    }
}

/// Speaker that discards audio and logs the peak level of each block
#[derive(Default)]
pub struct MeterSink {
    blocks: u64,
}

impl SpeakerSink for MeterSink {
    fn start(&mut self) -> Result<(), DeviceError> {
        tracing::info!("Speaker started");
        Ok(())
    }

    fn stop(&mut self) {
        tracing::info!("Speaker stopped after {} blocks", self.blocks);
        self.blocks = 0;
    }

    fn play(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        self.blocks += 1;
        tracing::trace!(
            "Playing {} samples, peak {}",
            samples.len(),
            super::buffer::peak_level(samples)
        );
        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_source_reads_available() {
        let source = BufferSource::new();
        let mut mic: Box<dyn MicrophoneSource> = Box::new(source.clone());
        source.push(&[1, 2, 3]);

        let mut buf = [0i16; 8];
        assert_eq!(mic.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(mic.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_injected_failure() {
        let sink = BufferSink::new();
        let mut speaker = sink.clone();
        sink.fail_next("unplugged");
        assert_eq!(
            speaker.play(&[1]),
            Err(DeviceError::Speaker("unplugged".into()))
        );
        assert_eq!(speaker.play(&[1]).unwrap(), 1);
        assert_eq!(sink.played(), vec![1]);
    }

    #[test]
    fn test_tone_is_paced() {
        let mut tone = ToneSource::new(1000.0, 8000);
        let mut buf = [0i16; 160];
        assert_eq!(tone.read(&mut buf).unwrap(), 0);

        tone.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        // 20 ms at 16 kHz is 320 samples, more than one read can take
        assert_eq!(tone.read(&mut buf).unwrap(), 160);
        let peak = buf.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 7000 && peak <= 8000);

        tone.stop();
        assert_eq!(tone.read(&mut buf).unwrap(), 0);
    }
}
