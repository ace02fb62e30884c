//! Capture → buffer → encode for one recording at a time.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;
use uuid::Uuid;

use super::buffer::SampleBuffer;
use super::capture::{AudioCapture, CaptureStats, CpalInput, InputBackend};
use crate::codec::wav::{encode_wav, EncodedAudio};
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::telemetry::{SharedTelemetry, TelemetryEvent};

/// A finished recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub encoded: EncodedAudio,
    pub stats: CaptureStats,
}

impl Recording {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

pub struct Recorder<B: InputBackend = CpalInput> {
    capture: AudioCapture<B>,
    buffer: Arc<Mutex<SampleBuffer>>,
    current: Option<Uuid>,
    telemetry: Option<SharedTelemetry>,
}

impl Recorder<CpalInput> {
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_backend(CpalInput, config)
    }
}

impl<B: InputBackend> Recorder<B> {
    pub fn with_backend(backend: B, config: CaptureConfig) -> Self {
        Self {
            capture: AudioCapture::with_backend(backend, config),
            buffer: Arc::new(Mutex::new(SampleBuffer::new())),
            current: None,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_running()
    }

    pub fn start(&mut self) -> Result<Uuid> {
        self.lock_buffer().clear();

        let buffer = self.buffer.clone();
        self.capture.on_chunk(move |chunk| {
            buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(chunk);
        })?;

        let sample_rate = self.capture.config().sample_rate;
        self.capture.start(sample_rate)?;

        let id = Uuid::new_v4();
        self.current = Some(id);
        self.record(TelemetryEvent::RecordingStarted { recording_id: id });
        info!("Recording {} started", id);
        Ok(id)
    }

    /// Stop capture, then drain and encode. `Ok(None)` when not recording.
    pub fn stop(&mut self) -> Result<Option<Recording>> {
        let Some(stats) = self.capture.stop() else {
            return Ok(None);
        };
        let id = self.current.take().unwrap_or_else(Uuid::new_v4);

        // Capture is fully stopped; nothing else touches the buffer now.
        let samples = self.lock_buffer().drain();
        let sample_rate = self.capture.config().sample_rate;
        let encoded = encode_wav(&samples, sample_rate, 1)?;

        self.record(TelemetryEvent::RecordingStopped {
            recording_id: id,
            samples: samples.len() as u64,
            chunks: stats.chunks,
            overruns: stats.overruns,
        });
        info!(
            "Recording {} stopped: {} samples, {} WAV bytes",
            id,
            samples.len(),
            encoded.len()
        );

        Ok(Some(Recording {
            id,
            samples,
            sample_rate,
            encoded,
            stats,
        }))
    }

    /// Stop capture and throw the buffered audio away.
    pub fn cancel(&mut self) {
        if self.capture.stop().is_some() {
            self.lock_buffer().clear();
            if let Some(id) = self.current.take() {
                info!("Recording {} discarded", id);
            }
        }
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, SampleBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: TelemetryEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(event);
        }
    }
}
