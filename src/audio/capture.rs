use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use super::chunk::SampleChunk;
use crate::config::CaptureConfig;
use crate::error::{PipelineError, Result};

const COLLECT_POLL: Duration = Duration::from_millis(5);

/// Receives every chunk, in order, on the collector thread.
pub type ChunkHandler = Box<dyn FnMut(SampleChunk) + Send + 'static>;

/// An open device stream. Dropping it stops the callbacks.
pub trait LiveInput {}

impl LiveInput for cpal::Stream {}

/// Producer half of the capture queue, moved into the device callback.
pub struct SampleSink {
    producer: HeapProd<f32>,
    overruns: Arc<AtomicU64>,
}

impl SampleSink {
    /// Real-time safe: no locks, no allocation. Samples that don't fit are dropped and counted.
    pub fn push(&mut self, samples: &[f32]) {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.overruns
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
    }

    /// Push the first channel of each interleaved frame.
    pub fn push_first_channel<T>(&mut self, interleaved: &[T], channels: usize)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        for frame in interleaved.chunks(channels.max(1)) {
            if self.producer.try_push(f32::from_sample(frame[0])).is_err() {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Something that can open a mono input stream feeding a [`SampleSink`].
pub trait InputBackend {
    fn open(&self, sample_rate: u32, block_size: usize, sink: SampleSink)
        -> Result<Box<dyn LiveInput>>;
}

/// Default host input device via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalInput;

impl InputBackend for CpalInput {
    fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        sink: SampleSink,
    ) -> Result<Box<dyn LiveInput>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| PipelineError::DeviceUnavailable("no input device available".into()))?;

        info!("Audio Input Device: {}", device.name().unwrap_or_default());

        let ranges = device
            .supported_input_configs()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;
        let range = pick_input_range(ranges, sample_rate).ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!(
                "input device has no f32/i16/u16 config at {}Hz",
                sample_rate
            ))
        })?;

        let supported = range.with_sample_rate(cpal::SampleRate(sample_rate));
        let sample_format = supported.sample_format();
        let buffer_size = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max }
                if (*min as usize..=*max as usize).contains(&block_size) =>
            {
                cpal::BufferSize::Fixed(block_size as u32)
            }
            _ => cpal::BufferSize::Default,
        };
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = buffer_size;

        info!(
            "Audio Config Selected: Rate={}Hz, Channels={}, Format={:?}",
            sample_rate, config.channels, sample_format
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, sink)?,
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, sink)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, sink)?,
            other => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        Ok(Box::new(stream))
    }
}

/// Rank of a sample format we can convert, best first. `None` if unsupported.
pub(crate) fn format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I16 => Some(1),
        cpal::SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Choose the input range to open at `sample_rate`.
///
/// Only formats [`build_input`] handles are considered. Fewer channels win
/// since only channel 0 is kept, then the better format.
pub(crate) fn pick_input_range<I>(ranges: I, sample_rate: u32) -> Option<cpal::SupportedStreamConfigRange>
where
    I: IntoIterator<Item = cpal::SupportedStreamConfigRange>,
{
    ranges
        .into_iter()
        .filter(|r| r.min_sample_rate().0 <= sample_rate && r.max_sample_rate().0 >= sample_rate)
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (r.channels(), rank, r)))
        .min_by_key(|(channels, rank, _)| (*channels, *rank))
        .map(|(_, _, range)| range)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: SampleSink,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = |err| error!("an error occurred on input stream: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                sink.push_first_channel(data, channels);
            },
            err_fn,
            None,
        )
        .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))
}

/// Plays back a prepared sample sequence as if it came from a device,
/// `callback_size` samples per callback.
///
/// By default every callback runs inside `open`. A paced input instead feeds
/// from its own thread, one callback per `pace`, so chunks flow while the
/// capture is running.
#[derive(Debug, Clone)]
pub struct SyntheticInput {
    samples: Arc<[f32]>,
    callback_size: usize,
    pace: Option<Duration>,
    unavailable: bool,
}

struct SyntheticStream;

impl LiveInput for SyntheticStream {}

/// Feeder thread of a paced [`SyntheticInput`].
///
/// Dropping it waits for the feeder, so every prepared sample has been
/// pushed by the time the capture flushes.
struct PacedStream {
    feeder: Option<JoinHandle<()>>,
}

impl LiveInput for PacedStream {}

impl Drop for PacedStream {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                error!("synthetic feeder panicked");
            }
        }
    }
}

impl SyntheticInput {
    pub fn new(samples: Vec<f32>, callback_size: usize) -> Self {
        Self {
            samples: samples.into(),
            callback_size: callback_size.max(1),
            pace: None,
            unavailable: false,
        }
    }

    /// Deliver one callback every `pace` from a separate thread.
    pub fn paced(samples: Vec<f32>, callback_size: usize, pace: Duration) -> Self {
        Self {
            pace: Some(pace),
            ..Self::new(samples, callback_size)
        }
    }

    /// A backend whose device can never be opened.
    pub fn unavailable() -> Self {
        Self {
            samples: Arc::from(Vec::new()),
            callback_size: 1,
            pace: None,
            unavailable: true,
        }
    }
}

impl InputBackend for SyntheticInput {
    fn open(&self, _: u32, _: usize, mut sink: SampleSink) -> Result<Box<dyn LiveInput>> {
        if self.unavailable {
            return Err(PipelineError::DeviceUnavailable("permission denied".into()));
        }

        let Some(pace) = self.pace else {
            for block in self.samples.chunks(self.callback_size) {
                sink.push(block);
            }
            return Ok(Box::new(SyntheticStream));
        };

        let samples = self.samples.clone();
        let callback_size = self.callback_size;
        let feeder = thread::Builder::new()
            .name("voicepipe-synthetic-input".into())
            .spawn(move || {
                for block in samples.chunks(callback_size) {
                    sink.push(block);
                    thread::sleep(pace);
                }
            })
            .map_err(|e| PipelineError::DeviceUnavailable(format!("synthetic feeder: {}", e)))?;
        Ok(Box::new(PacedStream {
            feeder: Some(feeder),
        }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub chunks: u64,
    pub samples: u64,
    pub overruns: u64,
}

struct ActiveCapture {
    stream: Box<dyn LiveInput>,
    stop: Arc<AtomicBool>,
    collector: JoinHandle<(ChunkHandler, CaptureStats)>,
    overruns: Arc<AtomicU64>,
}

/// Bridges an input device into fixed-size chunk deliveries.
///
/// The device callback only pushes into a lock-free queue. A collector
/// thread cuts the queue into `block_size` chunks and calls the registered
/// handler, so the handler never runs on the real-time thread.
pub struct AudioCapture<B: InputBackend = CpalInput> {
    backend: B,
    config: CaptureConfig,
    handler: Option<ChunkHandler>,
    active: Option<ActiveCapture>,
}

impl AudioCapture<CpalInput> {
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_backend(CpalInput, config)
    }
}

impl<B: InputBackend> AudioCapture<B> {
    pub fn with_backend(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            handler: None,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Register the chunk handler. Replaces any previous one.
    pub fn on_chunk<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(SampleChunk) + Send + 'static,
    {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    pub fn start(&mut self, sample_rate: u32) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }

        let block_size = self.config.block_size.max(1);
        let gain = self.config.gain;
        let (producer, consumer) = HeapRb::<f32>::new(self.config.ring_capacity.max(block_size)).split();
        let overruns = Arc::new(AtomicU64::new(0));
        let sink = SampleSink {
            producer,
            overruns: overruns.clone(),
        };

        let stream = self.backend.open(sample_rate, block_size, sink)?;

        let handler = self.handler.take().unwrap_or_else(|| {
            warn!("capture started without a chunk handler; samples will be discarded");
            Box::new(|_| {})
        });
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let collector = thread::Builder::new()
            .name("voicepipe-collector".into())
            .spawn(move || collect(consumer, handler, block_size, gain, stop_flag))
            .map_err(|e| PipelineError::DeviceUnavailable(format!("collector thread: {}", e)))?;

        info!(
            "Capture started at {}Hz, block {}, gain {}",
            sample_rate, block_size, gain
        );
        self.active = Some(ActiveCapture {
            stream,
            stop,
            collector,
            overruns,
        });
        Ok(())
    }

    /// Disconnect the device and flush the collector.
    ///
    /// When this returns the handler will not be called again. No-op when idle.
    pub fn stop(&mut self) -> Option<CaptureStats> {
        let active = self.active.take()?;

        // Device first: once the stream is gone nothing else can be pushed.
        drop(active.stream);
        active.stop.store(true, Ordering::Release);

        let mut stats = match active.collector.join() {
            Ok((handler, stats)) => {
                self.handler = Some(handler);
                stats
            }
            Err(_) => {
                error!("capture collector panicked; handler dropped");
                CaptureStats::default()
            }
        };
        stats.overruns = active.overruns.load(Ordering::Relaxed);

        if stats.overruns > 0 {
            warn!("capture queue overflowed, {} samples dropped", stats.overruns);
        }
        info!(
            "Capture stopped: {} chunks, {} samples",
            stats.chunks, stats.samples
        );
        Some(stats)
    }
}

impl<B: InputBackend> Drop for AudioCapture<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn amplify(sample: f32, gain: f32) -> f32 {
    (sample * gain).clamp(-1.0, 1.0)
}

fn collect(
    mut consumer: HeapCons<f32>,
    mut handler: ChunkHandler,
    block_size: usize,
    gain: f32,
    stop: Arc<AtomicBool>,
) -> (ChunkHandler, CaptureStats) {
    let mut stats = CaptureStats::default();
    let mut block = vec![0.0f32; block_size];
    let mut deliver = |samples: &[f32], stats: &mut CaptureStats| {
        let amplified = samples.iter().map(|&s| amplify(s, gain)).collect();
        handler(SampleChunk::new(amplified, stats.chunks));
        stats.chunks += 1;
        stats.samples += samples.len() as u64;
    };

    loop {
        // Read the flag before draining so a stop never strands samples.
        let stopping = stop.load(Ordering::Acquire);

        while consumer.occupied_len() >= block_size {
            let n = consumer.pop_slice(&mut block);
            deliver(&block[..n], &mut stats);
        }

        if stopping {
            let rest = consumer.occupied_len();
            if rest > 0 {
                let n = consumer.pop_slice(&mut block[..rest]);
                deliver(&block[..n], &mut stats);
            }
            debug!("collector flushed {} trailing samples", rest);
            break;
        }

        thread::sleep(COLLECT_POLL);
    }

    drop(deliver);
    (handler, stats)
}
