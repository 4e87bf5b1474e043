//! PCM16 audio payloads and the capture hand-off queue.
//!
//! Wire layout, little-endian:
//!
//! ```text
//! ┌────────────────┬────────────────┬──────────────────────────┐
//! │ sample_rate i32│ channels i32   │ interleaved i16 samples  │
//! └────────────────┴────────────────┴──────────────────────────┘
//! ```
//!
//! Capture runs on its own thread and pushes packets into an
//! [`AudioQueue`]; the update thread drains them and sends them through
//! the endpoint.

use bytes::{Buf, BufMut, BytesMut};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

use crate::error::{Error, Result};

/// Size of the rate/channel prefix.
pub const AUDIO_PREFIX_LEN: usize = 8;

// ============================================================================
// AudioPacket
// ============================================================================

/// One buffer of interleaved PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Samples per second.
    pub sample_rate: i32,
    /// Interleaved channel count.
    pub channels: i32,
    /// Interleaved samples.
    pub samples: Vec<i16>,
}

impl AudioPacket {
    /// Creates a packet.
    pub fn new(sample_rate: i32, channels: i32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Converts float samples in `[-1.0, 1.0]` to PCM16, clamping outliers.
    pub fn from_f32(sample_rate: i32, channels: i32, samples: &[f32]) -> Self {
        let samples = samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
            .collect();
        Self::new(sample_rate, channels, samples)
    }

    /// Frames per channel.
    #[must_use]
    pub fn frames(&self) -> usize {
        match usize::try_from(self.channels) {
            Ok(channels) if channels > 0 => self.samples.len() / channels,
            _ => 0,
        }
    }

    /// Serializes the packet.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(AUDIO_PREFIX_LEN + self.samples.len() * 2);
        buf.put_i32_le(self.sample_rate);
        buf.put_i32_le(self.channels);
        for sample in &self.samples {
            buf.put_i16_le(*sample);
        }
        buf.to_vec()
    }

    /// Parses a packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the prefix is truncated, the channel
    /// count is not positive or the sample bytes are odd.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < AUDIO_PREFIX_LEN {
            return Err(Error::protocol(format!(
                "audio payload of {} bytes is shorter than its prefix",
                data.len()
            )));
        }

        let sample_rate = data.get_i32_le();
        let channels = data.get_i32_le();

        if channels <= 0 {
            return Err(Error::protocol(format!("invalid channel count {channels}")));
        }
        if data.len() % 2 != 0 {
            return Err(Error::protocol("audio sample data has odd length"));
        }

        let mut samples = Vec::with_capacity(data.len() / 2);
        while data.has_remaining() {
            samples.push(data.get_i16_le());
        }

        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }
}

// ============================================================================
// AudioQueue
// ============================================================================

/// Bounded queue from a capture thread to the update thread.
///
/// When full, new packets are dropped: late audio is worse than a gap.
#[derive(Debug, Clone)]
pub struct AudioQueue {
    sender: Sender<AudioPacket>,
    receiver: Receiver<AudioPacket>,
}

impl AudioQueue {
    /// Creates a queue holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Sender handle for the capture thread.
    #[must_use]
    pub fn sender(&self) -> AudioSender {
        AudioSender {
            sender: self.sender.clone(),
        }
    }

    /// Takes every queued packet.
    pub fn drain(&self) -> Vec<AudioPacket> {
        self.receiver.try_iter().collect()
    }

    /// Queued packet count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Capture-side handle of an [`AudioQueue`].
#[derive(Debug, Clone)]
pub struct AudioSender {
    sender: Sender<AudioPacket>,
}

impl AudioSender {
    /// Queues a packet without blocking. Returns `false` if it was dropped.
    pub fn push(&self, packet: AudioPacket) -> bool {
        match self.sender.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Audio queue full, packet dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn test_layout() {
        let packet = AudioPacket::new(48_000, 2, vec![1, -1]);
        let bytes = packet.encode();
        assert_eq!(bytes.len(), AUDIO_PREFIX_LEN + 4);
        assert_eq!(&bytes[..4], &48_000i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[8..10], &1i16.to_le_bytes());
        assert_eq!(&bytes[10..], &(-1i16).to_le_bytes());
        assert_eq!(AudioPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(AudioPacket::decode(&[0; 4]).is_err());

        let mut zero_channels = AudioPacket::new(8_000, 1, vec![]).encode();
        zero_channels[4..8].copy_from_slice(&0i32.to_le_bytes());
        assert!(AudioPacket::decode(&zero_channels).is_err());

        let mut odd = AudioPacket::new(8_000, 1, vec![5]).encode();
        odd.push(0);
        assert!(AudioPacket::decode(&odd).is_err());
    }

    #[test]
    fn test_from_f32_clamps() {
        let packet = AudioPacket::from_f32(16_000, 1, &[0.0, 1.0, -2.0]);
        assert_eq!(packet.samples, vec![0, i16::MAX, -i16::MAX]);
        assert_eq!(packet.frames(), 3);
    }

    #[test]
    fn test_queue_drops_when_full() {
        let queue = AudioQueue::new(2);
        let sender = queue.sender();
        assert!(sender.push(AudioPacket::new(8_000, 1, vec![1])));
        assert!(sender.push(AudioPacket::new(8_000, 1, vec![2])));
        assert!(!sender.push(AudioPacket::new(8_000, 1, vec![3])));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].samples, vec![1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_across_threads() {
        let queue = AudioQueue::new(16);
        let sender = queue.sender();

        thread::spawn(move || {
            for i in 0..4 {
                sender.push(AudioPacket::new(8_000, 1, vec![i]));
            }
        })
        .join()
        .unwrap();

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.drain().len(), 4);
    }
}
