//! Audio frames and the inbound jitter buffer
//!
//! Frames arrive over a lossy broadcast radio and may be reordered by
//! retransmission. The jitter buffer restores sequence order before
//! playback and keeps loss statistics.

use crate::codec::audio::FrameFlags;

/// One mono frame of 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Mono samples
    pub samples: Vec<i16>,
    /// Frame sequence number (wraps)
    pub sequence: u16,
    /// Stream start / end markers
    pub flags: FrameFlags,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u16, flags: FrameFlags) -> Self {
        Self {
            samples,
            sequence,
            flags,
        }
    }

    /// Empty frame marking the end of a stream
    pub fn end_of_stream(sequence: u16) -> Self {
        Self::new(Vec::new(), sequence, FrameFlags::empty().with_end())
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> u16 {
        peak_level(&self.samples)
    }
}

/// Peak absolute amplitude of a block of samples
pub fn peak_level(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}

/// Jitter buffer for packet reordering
pub struct JitterBuffer {
    /// Buffer slots indexed by sequence modulo capacity
    slots: Vec<Option<AudioFrame>>,
    /// Capacity (must be power of 2)
    capacity: usize,
    /// Mask for fast modulo
    mask: usize,
    /// Next expected sequence number, set by the first frame of a stream
    next_sequence: Option<u16>,
    /// Minimum buffer delay in frames
    min_delay: usize,
    /// Frames currently held
    level: usize,
    received: usize,
    lost: usize,
    late: usize,
}

impl JitterBuffer {
    /// Create a new jitter buffer
    /// capacity must be a power of 2
    pub fn new(capacity: usize, min_delay: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            capacity,
            mask: capacity - 1,
            next_sequence: None,
            min_delay: min_delay.min(capacity),
            level: 0,
            received: 0,
            lost: 0,
            late: 0,
        }
    }

    /// Insert a frame. Returns false for late or duplicate frames.
    pub fn insert(&mut self, frame: AudioFrame) -> bool {
        let next = *self.next_sequence.get_or_insert(frame.sequence);

        // Signed distance handles u16 wrap-around
        let distance = frame.sequence.wrapping_sub(next) as i16;
        if distance < 0 {
            self.late += 1;
            return false;
        }
        if distance as usize >= self.capacity {
            // Too far ahead to hold; resync on this frame
            tracing::debug!(
                "jitter buffer resync: expected {}, got {}",
                next,
                frame.sequence
            );
            self.lost += self.level;
            self.clear_slots();
            self.next_sequence = Some(frame.sequence);
        }

        let index = (frame.sequence as usize) & self.mask;
        if self.slots[index].is_some() {
            self.late += 1;
            return false;
        }
        self.slots[index] = Some(frame);
        self.received += 1;
        self.level += 1;
        true
    }

    /// Get the next frame in sequence order once enough are buffered.
    /// Gaps in front of a buffered frame are counted as lost and skipped.
    pub fn get_next(&mut self) -> Option<AudioFrame> {
        if self.level == 0 || self.level < self.min_delay {
            return None;
        }
        self.force_get_next()
    }

    /// Get the next buffered frame regardless of the minimum delay
    pub fn force_get_next(&mut self) -> Option<AudioFrame> {
        let mut next = self.next_sequence?;
        while self.level > 0 {
            let index = (next as usize) & self.mask;
            next = next.wrapping_add(1);
            self.next_sequence = Some(next);
            match self.slots[index].take() {
                Some(frame) => {
                    self.level -= 1;
                    return Some(frame);
                }
                None => self.lost += 1,
            }
        }
        None
    }

    /// Reset the jitter buffer for a new stream; statistics are kept
    pub fn reset(&mut self) {
        self.clear_slots();
        self.next_sequence = None;
    }

    fn clear_slots(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.level = 0;
    }

    pub fn len(&self) -> usize {
        self.level
    }

    pub fn is_empty(&self) -> bool {
        self.level == 0
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.level,
            capacity: self.capacity,
            received: self.received,
            lost: self.lost,
            late: self.late,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub received: usize,
    pub lost: usize,
    pub late: usize,
}

impl JitterBufferStats {
    pub fn loss_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.lost as f32 / (self.received + self.lost) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u16) -> AudioFrame {
        AudioFrame::new(vec![seq as i16; 4], seq, FrameFlags::empty())
    }

    #[test]
    fn test_jitter_buffer_reorders() {
        let mut jitter = JitterBuffer::new(16, 1);

        // The first frame of the stream fixes the start sequence
        assert!(jitter.insert(frame(2)));
        assert!(!jitter.insert(frame(0)));
        assert!(!jitter.insert(frame(1)));
        assert_eq!(jitter.stats().late, 2);

        assert!(jitter.insert(frame(4)));
        assert!(jitter.insert(frame(3)));
        assert_eq!(jitter.get_next().unwrap().sequence, 2);
        assert_eq!(jitter.get_next().unwrap().sequence, 3);
        assert_eq!(jitter.get_next().unwrap().sequence, 4);
    }

    #[test]
    fn test_jitter_buffer_in_order() {
        let mut jitter = JitterBuffer::new(16, 2);
        jitter.insert(frame(10));
        assert!(jitter.get_next().is_none());

        jitter.insert(frame(12));
        jitter.insert(frame(11));
        assert_eq!(jitter.get_next().unwrap().sequence, 10);
        assert_eq!(jitter.get_next().unwrap().sequence, 11);

        // Not enough buffered for min_delay now
        assert!(jitter.get_next().is_none());
        assert_eq!(jitter.force_get_next().unwrap().sequence, 12);
    }

    #[test]
    fn test_gap_counted_as_lost() {
        let mut jitter = JitterBuffer::new(16, 0);
        jitter.insert(frame(0));
        jitter.insert(frame(3));

        assert_eq!(jitter.get_next().unwrap().sequence, 0);
        assert_eq!(jitter.get_next().unwrap().sequence, 3);
        assert!(jitter.get_next().is_none());

        let stats = jitter.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.lost, 2);
        assert!((stats.loss_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut jitter = JitterBuffer::new(8, 0);
        jitter.insert(frame(u16::MAX));
        jitter.insert(frame(0));
        assert_eq!(jitter.get_next().unwrap().sequence, u16::MAX);
        assert_eq!(jitter.get_next().unwrap().sequence, 0);
    }

    #[test]
    fn test_far_ahead_resyncs() {
        let mut jitter = JitterBuffer::new(8, 0);
        jitter.insert(frame(0));
        jitter.insert(frame(100));
        assert_eq!(jitter.get_next().unwrap().sequence, 100);
        assert_eq!(jitter.stats().lost, 1);
    }

    #[test]
    fn test_reset_starts_new_stream() {
        let mut jitter = JitterBuffer::new(8, 0);
        jitter.insert(frame(50));
        jitter.reset();
        assert!(jitter.is_empty());
        assert!(jitter.insert(frame(3)));
        assert_eq!(jitter.get_next().unwrap().sequence, 3);
    }

    #[test]
    fn test_peak_level() {
        assert_eq!(peak_level(&[0, -300, 200]), 300);
        assert_eq!(peak_level(&[i16::MIN]), 32768);
        assert_eq!(peak_level(&[]), 0);
    }
}
