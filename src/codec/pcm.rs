use crate::codec::transport;
use crate::error::{PipelineError, Result};

/// Per-channel float samples ready for playback. Consumed once by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Seconds.
    pub duration: f64,
}

impl DecodedAudio {
    /// Build from per-channel data. Channels must share one length.
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() || sample_rate == 0 {
            return Err(PipelineError::MalformedAudio(
                "need at least one channel and a non-zero rate".into(),
            ));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(PipelineError::MalformedAudio("channels differ in length".into()));
        }
        Ok(Self {
            channel_count: channels.len() as u16,
            duration: frames as f64 / sample_rate as f64,
            channels,
            sample_rate,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::from_channels(vec![samples], sample_rate)
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Little-endian signed 16-bit interleaved PCM → normalized floats in [-1, 1).
pub fn decode_pcm16(raw: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if channels == 0 || sample_rate == 0 {
        return Err(PipelineError::MalformedAudio(format!(
            "invalid layout: {} channels at {}Hz",
            channels, sample_rate
        )));
    }
    let frame_bytes = channels as usize * 2;
    if raw.len() % frame_bytes != 0 {
        return Err(PipelineError::MalformedAudio(format!(
            "{} bytes is not a multiple of {} ({} channels of 16-bit samples)",
            raw.len(),
            frame_bytes,
            channels
        )));
    }

    let frame_count = raw.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frame_count); channels as usize];
    for frame in raw.chunks_exact(frame_bytes) {
        for (channel, bytes) in out.iter_mut().zip(frame.chunks_exact(2)) {
            let value = i16::from_le_bytes([bytes[0], bytes[1]]);
            channel.push(value as f32 / 32768.0);
        }
    }

    DecodedAudio::from_channels(out, sample_rate)
}

/// Base64 transport wrapper around [`decode_pcm16`].
pub fn decode_base64_pcm16(text: &str, sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    let raw = transport::decode_base64(text)?;
    decode_pcm16(&raw, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_stereo() {
        let mut raw = Vec::new();
        for v in [16384i16, -16384, 0, 32767] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let audio = decode_pcm16(&raw, 24_000, 2).unwrap();
        assert_eq!(audio.channel_count, 2);
        assert_eq!(audio.frame_count(), 2);
        assert_eq!(audio.channels[0], vec![0.5, 0.0]);
        assert_eq!(audio.channels[1], vec![-0.5, 32767.0 / 32768.0]);
    }

    #[test]
    fn test_extremes() {
        let raw = [i16::MIN.to_le_bytes(), i16::MAX.to_le_bytes()].concat();
        let audio = decode_pcm16(&raw, 24_000, 1).unwrap();
        assert_eq!(audio.channels[0][0], -1.0);
        assert!(audio.channels[0][1] < 1.0);
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(matches!(
            decode_pcm16(&[0, 0], 24_000, 0),
            Err(PipelineError::MalformedAudio(_))
        ));
    }

    #[test]
    fn test_duration() {
        let audio = decode_pcm16(&vec![0u8; 48_000], 24_000, 1).unwrap();
        assert_eq!(audio.frame_count(), 24_000);
        assert_eq!(audio.duration, 1.0);
    }
}
