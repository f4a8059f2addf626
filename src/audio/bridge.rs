//! Audio framing bridge
//!
//! Sits between the audio devices and the link. Outbound, it accumulates
//! microphone samples into fixed frames and applies the noise gate. Inbound,
//! it reorders frames through the jitter buffer and applies volume and gain
//! before handing samples to the speaker.

use crate::audio::buffer::{AudioFrame, JitterBuffer, JitterBufferStats};
use crate::audio::device::{MicrophoneSource, SpeakerSink};
use crate::codec::audio::FrameFlags;
use crate::constants::{FRAME_SAMPLES, JITTER_BUFFER_SLOTS};
use crate::error::{ConfigError, DeviceError};

/// Noise suppression level, 0 (off) to 4 (strongest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoiseSuppression(u8);

impl NoiseSuppression {
    pub const MAX: u8 = 4;

    pub fn new(level: u8) -> Result<Self, ConfigError> {
        if level > Self::MAX {
            return Err(ConfigError::InvalidNoiseSuppression(level));
        }
        Ok(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Samples quieter than this amplitude are zeroed
    pub fn gate(self) -> i16 {
        match self.0 {
            0 => 0,
            level => 32 << level,
        }
    }

    pub fn apply(self, samples: &mut [i16]) {
        let gate = self.gate();
        if gate == 0 {
            return;
        }
        for sample in samples.iter_mut() {
            if sample.unsigned_abs() < gate as u16 {
                *sample = 0;
            }
        }
    }
}

/// Per-session audio processing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeParams {
    pub noise_suppression: NoiseSuppression,
    /// Automatic gain in dBFS, 0-31
    pub auto_gain_dbfs: u8,
    /// Output volume multiplier, strictly positive
    pub volume_multiplier: f32,
    /// Frames held in the jitter buffer before playback starts
    pub jitter_delay: usize,
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            noise_suppression: NoiseSuppression::default(),
            auto_gain_dbfs: 0,
            volume_multiplier: 1.0,
            jitter_delay: 2,
        }
    }
}

impl BridgeParams {
    pub const MAX_AUTO_GAIN_DBFS: u8 = 31;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_gain_dbfs > Self::MAX_AUTO_GAIN_DBFS {
            return Err(ConfigError::InvalidAutoGain(self.auto_gain_dbfs));
        }
        // NaN fails this comparison too
        if !(self.volume_multiplier > 0.0 && self.volume_multiplier.is_finite()) {
            return Err(ConfigError::InvalidVolume(self.volume_multiplier));
        }
        Ok(())
    }

    /// Linear gain factor for the configured dBFS boost
    pub fn linear_gain(&self) -> f32 {
        10f32.powf(self.auto_gain_dbfs as f32 / 20.0)
    }
}

pub struct AudioBridge {
    params: BridgeParams,
    /// Output scale: volume multiplier times linear gain
    scale: f32,
    /// Microphone samples not yet framed
    pending: Vec<i16>,
    read_buf: Vec<i16>,
    tx_sequence: u16,
    /// Set until the first frame of an outbound stream is produced
    tx_start: bool,
    jitter: JitterBuffer,
}

impl AudioBridge {
    pub fn new(params: BridgeParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            scale: params.volume_multiplier * params.linear_gain(),
            params,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            read_buf: vec![0; FRAME_SAMPLES],
            tx_sequence: 0,
            tx_start: true,
            jitter: JitterBuffer::new(JITTER_BUFFER_SLOTS, params.jitter_delay),
        })
    }

    pub fn params(&self) -> &BridgeParams {
        &self.params
    }

    /// Read from the microphone and return the next full frame, if one is
    /// available. The noise gate is applied before framing.
    pub fn pull_frame(
        &mut self,
        microphone: &mut dyn MicrophoneSource,
    ) -> Result<Option<AudioFrame>, DeviceError> {
        while self.pending.len() < FRAME_SAMPLES {
            let want = FRAME_SAMPLES - self.pending.len();
            let read = microphone.read(&mut self.read_buf[..want])?;
            if read == 0 {
                return Ok(None);
            }
            let block = &mut self.read_buf[..read];
            self.params.noise_suppression.apply(block);
            self.pending.extend_from_slice(block);
        }

        let samples: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
        let mut flags = FrameFlags::empty();
        if self.tx_start {
            flags = flags.with_start();
            self.tx_start = false;
        }
        let frame = AudioFrame::new(samples, self.tx_sequence, flags);
        self.tx_sequence = self.tx_sequence.wrapping_add(1);
        Ok(Some(frame))
    }

    /// Close the outbound stream. Returns the end-of-stream marker frame and
    /// discards any partial frame.
    pub fn end_stream(&mut self) -> AudioFrame {
        self.pending.clear();
        self.tx_start = true;
        let frame = AudioFrame::end_of_stream(self.tx_sequence);
        self.tx_sequence = self.tx_sequence.wrapping_add(1);
        frame
    }

    /// Apply volume and gain with saturation
    pub fn scale_output(&self, samples: &[i16]) -> Vec<i16> {
        samples
            .iter()
            .map(|&s| (s as f32 * self.scale).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect()
    }

    /// Scale samples and hand them to the speaker
    pub fn push_frame(
        &mut self,
        samples: &[i16],
        speaker: &mut dyn SpeakerSink,
    ) -> Result<usize, DeviceError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let scaled = self.scale_output(samples);
        speaker.play(&scaled)
    }

    /// Queue an inbound frame for reordering
    pub fn receive(&mut self, frame: AudioFrame) -> bool {
        self.jitter.insert(frame)
    }

    /// Play every frame the jitter buffer releases
    pub fn play_ready(&mut self, speaker: &mut dyn SpeakerSink) -> Result<usize, DeviceError> {
        let mut played = 0;
        while let Some(frame) = self.jitter.get_next() {
            played += self.push_frame(&frame.samples, speaker)?;
        }
        Ok(played)
    }

    /// Play whatever is buffered, ignoring the delay, and start a fresh
    /// inbound stream
    pub fn flush(&mut self, speaker: &mut dyn SpeakerSink) -> Result<usize, DeviceError> {
        let mut played = 0;
        let mut result = Ok(());
        while let Some(frame) = self.jitter.force_get_next() {
            match self.push_frame(&frame.samples, speaker) {
                Ok(n) => played += n,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.jitter.reset();
        result.map(|_| played)
    }

    /// Drop buffered inbound audio without playing it
    pub fn reset_inbound(&mut self) {
        self.jitter.reset();
    }

    /// Drop buffered outbound samples and restart sequence flags
    pub fn reset_outbound(&mut self) {
        self.pending.clear();
        self.tx_start = true;
    }

    pub fn jitter_stats(&self) -> JitterBufferStats {
        self.jitter.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{BufferSink, BufferSource};

    fn bridge(params: BridgeParams) -> AudioBridge {
        AudioBridge::new(params).unwrap()
    }

    #[test]
    fn test_noise_ladder() {
        let gates: Vec<i16> = (0..=4)
            .map(|l| NoiseSuppression::new(l).unwrap().gate())
            .collect();
        assert_eq!(gates, vec![0, 64, 128, 256, 512]);
        assert_eq!(
            NoiseSuppression::new(5),
            Err(ConfigError::InvalidNoiseSuppression(5))
        );
    }

    #[test]
    fn test_pull_frame_accumulates() {
        let source = BufferSource::new();
        let mut mic = source.clone();
        let mut bridge = bridge(BridgeParams::default());

        source.push(&[100; 60]);
        assert!(bridge.pull_frame(&mut mic).unwrap().is_none());

        source.push(&[100; 60]);
        let frame = bridge.pull_frame(&mut mic).unwrap().unwrap();
        assert_eq!(frame.samples.len(), FRAME_SAMPLES);
        assert_eq!(frame.sequence, 0);
        assert!(frame.flags.is_start());

        // 8 samples left over, not enough for another frame
        assert!(bridge.pull_frame(&mut mic).unwrap().is_none());
        source.push(&[100; FRAME_SAMPLES]);
        let frame = bridge.pull_frame(&mut mic).unwrap().unwrap();
        assert_eq!(frame.sequence, 1);
        assert!(!frame.flags.is_start());
    }

    #[test]
    fn test_noise_gate_applied() {
        let source = BufferSource::new();
        let mut mic = source.clone();
        let mut bridge = bridge(BridgeParams {
            noise_suppression: NoiseSuppression::new(2).unwrap(),
            ..Default::default()
        });

        let mut samples = vec![100i16; FRAME_SAMPLES];
        samples[0] = -127;
        samples[1] = 128;
        source.push(&samples);

        let frame = bridge.pull_frame(&mut mic).unwrap().unwrap();
        assert_eq!(frame.samples[0], 0);
        assert_eq!(frame.samples[1], 128);
        assert_eq!(frame.samples[2], 0);
    }

    #[test]
    fn test_end_stream_restarts() {
        let source = BufferSource::new();
        let mut mic = source.clone();
        let mut bridge = bridge(BridgeParams::default());
        source.push(&[1; FRAME_SAMPLES]);
        bridge.pull_frame(&mut mic).unwrap();

        let end = bridge.end_stream();
        assert!(end.flags.is_end());
        assert_eq!(end.sequence, 1);

        source.push(&[1; FRAME_SAMPLES]);
        assert!(bridge.pull_frame(&mut mic).unwrap().unwrap().flags.is_start());
    }

    #[test]
    fn test_output_clamps() {
        let bridge = bridge(BridgeParams {
            volume_multiplier: 2.0,
            ..Default::default()
        });
        assert_eq!(bridge.scale_output(&[16384, -16384, -20000, 100]), vec![32767, -32768, -32768, 200]);
    }

    #[test]
    fn test_auto_gain() {
        let params = BridgeParams {
            auto_gain_dbfs: 20,
            ..Default::default()
        };
        assert!((params.linear_gain() - 10.0).abs() < 1e-4);
        assert_eq!(bridge(params).scale_output(&[100]), vec![1000]);
    }

    #[test]
    fn test_invalid_params() {
        let bad_volume = BridgeParams {
            volume_multiplier: 0.0,
            ..Default::default()
        };
        assert_eq!(bad_volume.validate(), Err(ConfigError::InvalidVolume(0.0)));

        let infinite = BridgeParams {
            volume_multiplier: f32::INFINITY,
            ..Default::default()
        };
        assert!(matches!(infinite.validate(), Err(ConfigError::InvalidVolume(_))));

        let bad_gain = BridgeParams {
            auto_gain_dbfs: 32,
            ..Default::default()
        };
        assert!(AudioBridge::new(bad_gain).is_err());
    }

    #[test]
    fn test_flush_plays_buffered() {
        let sink = BufferSink::new();
        let mut speaker = sink.clone();
        let mut bridge = bridge(BridgeParams {
            jitter_delay: 4,
            ..Default::default()
        });

        bridge.receive(AudioFrame::new(vec![1, 2], 0, FrameFlags::empty().with_start()));
        bridge.receive(AudioFrame::new(vec![3], 1, FrameFlags::empty()));
        assert_eq!(bridge.play_ready(&mut speaker).unwrap(), 0);

        assert_eq!(bridge.flush(&mut speaker).unwrap(), 3);
        assert_eq!(sink.played(), vec![1, 2, 3]);

        // A new stream may start at any sequence after a flush
        assert!(bridge.receive(AudioFrame::new(vec![9], 500, FrameFlags::empty())));
    }
}
