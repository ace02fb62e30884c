use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tracing::{error, info};

use super::mixer::{Mixer, MixerSink, OutputSink};
use crate::audio::capture::format_rank;
use crate::config::PlaybackConfig;
use crate::error::{PipelineError, Result};

/// Default output device driven by a [`Mixer`].
///
/// Holds the cpal stream, which is not `Send`; keep it on the thread that
/// opened it and pass [`CpalOutput::sink`] to the scheduler.
pub struct CpalOutput {
    _stream: cpal::Stream,
    sink: Arc<MixerSink>,
    closed: Arc<AtomicBool>,
}

impl CpalOutput {
    pub fn open(config: &PlaybackConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PipelineError::OutputUnavailable("no output device available".into()))?;

        info!("Audio Output Device: {}", device.name().unwrap_or_default());

        let preferred = device
            .supported_output_configs()
            .map_err(|e| PipelineError::OutputUnavailable(e.to_string()))?
            .filter(|r| {
                r.channels() == config.channels
                    && r.min_sample_rate().0 <= config.sample_rate
                    && r.max_sample_rate().0 >= config.sample_rate
            })
            .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, r)| r)
            .map(|r| r.with_sample_rate(cpal::SampleRate(config.sample_rate)));

        let supported = match preferred {
            Some(c) => c,
            None => device
                .default_output_config()
                .map_err(|e| PipelineError::OutputUnavailable(e.to_string()))?,
        };
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();

        info!(
            "Output Config Selected: Rate={}Hz, Channels={}, Format={:?}",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        let (mixer, sink) = Mixer::new(
            stream_config.sample_rate.0,
            stream_config.channels,
            config.gain,
            config.voice_queue,
        );
        let closed = sink.closed_flag();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, mixer)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, mixer)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, mixer)?,
            other => {
                return Err(PipelineError::OutputUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream
            .play()
            .map_err(|e| PipelineError::OutputUnavailable(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sink: Arc::new(sink),
            closed,
        })
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let fault = mixer.fault_flag();
    let err_fn = move |err| {
        error!("an error occurred on output stream: {}", err);
        fault.store(true, Ordering::Release);
    };
    let mut scratch: Vec<f32> = Vec::with_capacity(16_384);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PipelineError::OutputUnavailable(e.to_string()))
}

/// Renders on demand instead of on a device clock. Headless runs and tests.
pub struct OfflineOutput {
    mixer: Mutex<Mixer>,
    sink: Arc<MixerSink>,
    fault: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl OfflineOutput {
    pub fn new(config: &PlaybackConfig) -> Self {
        let (mixer, sink) = Mixer::new(
            config.sample_rate,
            config.channels,
            config.gain,
            config.voice_queue,
        );
        Self {
            fault: mixer.fault_flag(),
            closed: sink.closed_flag(),
            mixer: Mutex::new(mixer),
            sink: Arc::new(sink),
        }
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }

    /// Render `frames` frames of interleaved output, advancing the clock.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.sink.channels() as usize];
        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(&mut out);
        out
    }

    /// Simulate a device error: voices audible in the next render fail.
    pub fn inject_fault(&self) {
        self.fault.store(true, Ordering::Release);
    }

    /// Simulate the device going away: further submissions fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
