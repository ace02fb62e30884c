//! PCM16 WAV via hound.
//!
//! Mono and stereo output uses the canonical 44-byte header:
//!
//! | offset | field |
//! |---|---|
//! | 0  | `RIFF` |
//! | 4  | RIFF chunk size = 36 + data length |
//! | 8  | `WAVE` |
//! | 12 | `fmt ` (16 bytes, PCM) |
//! | 36 | `data` |
//! | 40 | data length |
//!
//! More channels get hound's extensible fmt chunk, so the payload offset is
//! taken from the parsed header rather than assumed.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::codec::transport;
use crate::error::{PipelineError, Result};

pub const HEADER_LEN: usize = 44;
pub const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: usize = (BITS_PER_SAMPLE / 8) as usize;
/// The RIFF size field is a u32 that also covers 36 header bytes.
const MAX_DATA_LEN: usize = u32::MAX as usize - 36;

/// Self-describing WAV bytes. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    bytes: Vec<u8>,
    data_offset: usize,
}

impl EncodedAudio {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> Result<WavHeader> {
        WavHeader::parse(&self.bytes)
    }

    /// Raw interleaved PCM16 bytes of the data chunk.
    pub fn pcm_payload(&self) -> &[u8] {
        &self.bytes[self.data_offset..]
    }

    pub fn to_base64(&self) -> String {
        transport::encode_base64(&self.bytes)
    }

    /// Wrap bytes produced elsewhere after checking the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = WavHeader::parse(&bytes)?;
        Ok(Self {
            data_offset: header.data_offset,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
    /// Where the data chunk payload starts.
    pub data_offset: usize,
}

impl WavHeader {
    /// Read a 16-bit PCM header and check its sizes against `bytes.len()`.
    ///
    /// The data chunk must be the last chunk and must be complete.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != BITS_PER_SAMPLE {
            return Err(PipelineError::MalformedAudio(format!(
                "unsupported sample format {:?} at {} bits",
                spec.sample_format, spec.bits_per_sample
            )));
        }
        let (block_align, byte_rate) = frame_layout(spec.channels, spec.sample_rate)?;

        let data_len = reader.len() as usize * BYTES_PER_SAMPLE;
        let data_offset = bytes
            .len()
            .checked_sub(data_len)
            .filter(|&start| start >= HEADER_LEN && &bytes[start - 8..start - 4] == b"data")
            .ok_or_else(|| {
                PipelineError::MalformedAudio(format!(
                    "declared data length {} does not match the {} byte file",
                    data_len,
                    bytes.len()
                ))
            })?;

        let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if riff_size as usize != bytes.len() - 8 {
            return Err(PipelineError::MalformedAudio(format!(
                "RIFF size {} but file is {} bytes",
                riff_size,
                bytes.len()
            )));
        }

        Ok(Self {
            riff_size,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            byte_rate,
            block_align,
            bits_per_sample: spec.bits_per_sample,
            data_len: data_len as u32,
            data_offset,
        })
    }
}

/// Block align and byte rate, rejecting layouts the header fields can't hold.
fn frame_layout(channels: u16, sample_rate: u32) -> Result<(u16, u32)> {
    if channels == 0 || sample_rate == 0 {
        return Err(PipelineError::MalformedAudio(format!(
            "invalid layout: {} channels at {}Hz",
            channels, sample_rate
        )));
    }
    let block_align = channels
        .checked_mul(BYTES_PER_SAMPLE as u16)
        .ok_or_else(|| PipelineError::MalformedAudio(format!("{} channels is too many", channels)))?;
    let byte_rate = sample_rate
        .checked_mul(block_align as u32)
        .ok_or_else(|| {
            PipelineError::MalformedAudio(format!(
                "byte rate overflows at {}Hz x {} channels",
                sample_rate, channels
            ))
        })?;
    Ok((block_align, byte_rate))
}

/// Quantize one sample: NaN/∞ become 0, clamp to [-1, 1], then scale
/// negatives by 32768 and positives by 32767.
pub fn quantize(sample: f32) -> i16 {
    let s = if sample.is_finite() { sample.clamp(-1.0, 1.0) } else { 0.0 };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode interleaved float samples as 16-bit PCM WAV. Deterministic.
///
/// Fails only for layouts a WAV header can't describe: zero channels or
/// rate, a partial last frame, or more than 4 GiB of data.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<EncodedAudio> {
    frame_layout(channels, sample_rate)?;
    if samples.len() % channels as usize != 0 {
        return Err(PipelineError::MalformedAudio(format!(
            "{} samples is not a whole number of {}-channel frames",
            samples.len(),
            channels
        )));
    }
    let data_len = samples
        .len()
        .checked_mul(BYTES_PER_SAMPLE)
        .filter(|&n| n <= MAX_DATA_LEN)
        .ok_or_else(|| {
            PipelineError::MalformedAudio(format!("{} samples exceed the WAV size limit", samples.len()))
        })?;

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + data_len));
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(quantize(sample))?;
    }
    writer.finalize()?;

    let bytes = cursor.into_inner();
    let data_offset = bytes.len() - data_len;
    Ok(EncodedAudio { bytes, data_offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(2.5), 32767);
        assert_eq!(quantize(-7.0), -32768);
        assert_eq!(quantize(f32::NAN), 0);
        assert_eq!(quantize(f32::INFINITY), 0);
        assert_eq!(quantize(f32::NEG_INFINITY), 0);
    }

    #[test]
    fn test_header_fields() {
        let wav = encode_wav(&[0.0; 10], 16_000, 1).unwrap();
        let header = wav.header().unwrap();
        assert_eq!(header.channels, 1);
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(header.byte_rate, 32_000);
        assert_eq!(header.block_align, 2);
        assert_eq!(header.data_len, 20);
        assert_eq!(header.riff_size, 56);
        assert_eq!(header.data_offset, HEADER_LEN);
    }

    #[test]
    fn test_canonical_byte_layout() {
        let wav = encode_wav(&[1.0, -1.0], 16_000, 1).unwrap();
        let bytes = wav.as_bytes();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[4..8], &40u32.to_le_bytes());
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(&bytes[16..20], &16u32.to_le_bytes());
        assert_eq!(&bytes[20..22], &1u16.to_le_bytes());
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(&bytes[40..44], &4u32.to_le_bytes());
        assert_eq!(&bytes[44..], &[0xff, 0x7f, 0x00, 0x80]);
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let mut bytes = encode_wav(&[0.5; 4], 16_000, 1).unwrap().into_bytes();
        bytes.pop();
        assert!(matches!(
            WavHeader::parse(&bytes),
            Err(PipelineError::MalformedAudio(_))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_riff_size() {
        let mut bytes = encode_wav(&[0.5; 4], 16_000, 1).unwrap().into_bytes();
        bytes[4] ^= 0x01;
        assert!(matches!(
            WavHeader::parse(&bytes),
            Err(PipelineError::MalformedAudio(_))
        ));
    }

    #[test]
    fn test_unrepresentable_layouts_rejected() {
        for (rate, channels) in [(16_000, 0), (0, 1), (u32::MAX, 2), (16_000, u16::MAX)] {
            assert!(
                matches!(
                    encode_wav(&[], rate, channels),
                    Err(PipelineError::MalformedAudio(_))
                ),
                "{}Hz x {}",
                rate,
                channels
            );
        }
        assert!(matches!(
            encode_wav(&[0.0; 3], 16_000, 2),
            Err(PipelineError::MalformedAudio(_))
        ));
    }
}
