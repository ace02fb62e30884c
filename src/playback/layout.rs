//! Fit decoded audio to the output device: sample rate, then channel layout.
//!
//! Runs on the scheduling side, never inside the output callback.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::codec::DecodedAudio;
use crate::error::Result;

const RESAMPLE_CHUNK: usize = 1024;

/// A segment already converted to one output layout.
///
/// Conversion is CPU heavy for long segments; build this off the async
/// runtime and hand the result to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAudio {
    frames: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PreparedAudio {
    pub fn new(audio: &DecodedAudio, sample_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1);
        Ok(Self {
            frames: prepare(audio, sample_rate, channels)?,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len() / self.channels as usize
    }

    pub(crate) fn into_frames(self) -> Vec<f32> {
        self.frames
    }
}

/// Interleaved frames at `sample_rate` with `channels` channels.
pub fn prepare(audio: &DecodedAudio, sample_rate: u32, channels: u16) -> Result<Vec<f32>> {
    let resampled;
    let source = if audio.sample_rate == sample_rate {
        &audio.channels
    } else {
        resampled = resample(&audio.channels, audio.sample_rate, sample_rate)?;
        debug!(
            "resampled {} frames {}Hz -> {} frames {}Hz",
            audio.frame_count(),
            audio.sample_rate,
            resampled.first().map_or(0, Vec::len),
            sample_rate
        );
        &resampled
    };
    Ok(interleave(source, channels as usize))
}

/// Map source channels onto `out_channels` and interleave.
///
/// Mono sources are copied to every output channel, mono outputs average
/// all sources, otherwise channels map by index and extra outputs stay silent.
pub fn interleave(source: &[Vec<f32>], out_channels: usize) -> Vec<f32> {
    let out_channels = out_channels.max(1);
    let frames = source.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * out_channels);

    for i in 0..frames {
        for c in 0..out_channels {
            let sample = if source.len() == 1 {
                source[0][i]
            } else if out_channels == 1 {
                source.iter().map(|ch| ch[i]).sum::<f32>() / source.len() as f32
            } else if c < source.len() {
                source[c][i]
            } else {
                0.0
            };
            out.push(sample);
        }
    }
    out
}

/// Whole-buffer FFT resampling. Output length is `ceil(frames * to / from)`.
pub fn resample(channels: &[Vec<f32>], from: u32, to: u32) -> Result<Vec<Vec<f32>>> {
    let frames = channels.first().map_or(0, Vec::len);
    if from == to || frames == 0 || channels.is_empty() {
        return Ok(channels.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, channels.len())?;
    let expected = (frames as u64 * to as u64).div_ceil(from as u64) as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];

    let append = |out: &mut Vec<Vec<f32>>, produced: Vec<Vec<f32>>| {
        for (dst, src) in out.iter_mut().zip(produced) {
            dst.extend_from_slice(&src);
        }
    };

    let mut pos = 0;
    while pos < frames {
        let need = resampler.input_frames_next();
        let end = (pos + need).min(frames);
        let slices: Vec<&[f32]> = channels.iter().map(|c| &c[pos..end]).collect();
        let produced = if end - pos == need {
            resampler.process(slices.as_slice(), None)?
        } else {
            resampler.process_partial(Some(slices.as_slice()), None)?
        };
        append(&mut out, produced);
        pos = end;
    }

    // Push zeros through until the delayed tail has come out.
    while out[0].len() < expected + delay {
        let produced = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if produced.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut out, produced);
    }

    for channel in &mut out {
        let skip = delay.min(channel.len());
        channel.drain(..skip);
        channel.resize(expected, 0.0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo() {
        let out = interleave(&[vec![0.1, 0.2]], 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_stereo_to_mono() {
        let out = interleave(&[vec![0.2, 0.4], vec![0.4, 0.0]], 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_resample_length() {
        let input = vec![vec![0.0f32; 24_000]];
        let out = resample(&input, 24_000, 48_000).unwrap();
        assert_eq!(out[0].len(), 48_000);

        let out = resample(&input, 24_000, 16_000).unwrap();
        assert_eq!(out[0].len(), 16_000);
    }

    #[test]
    fn test_same_rate_passthrough() {
        let input = vec![vec![0.5f32; 10]];
        assert_eq!(resample(&input, 24_000, 24_000).unwrap(), input);
    }
}
