use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::layout::PreparedAudio;
use super::mixer::OutputSink;
use super::voice::{PlaybackId, Voice, VoiceState};
use crate::codec::DecodedAudio;
use crate::error::{PipelineError, Result};
use crate::telemetry::{InterruptionSource, SegmentEventKind, SharedTelemetry, TelemetryEvent};

/// A scheduled segment, as seen by the caller.
///
/// The scheduler owns the underlying voice; this is a view onto its state.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    voice: Arc<Voice>,
    sample_rate: u32,
}

impl PlaybackHandle {
    pub fn id(&self) -> PlaybackId {
        self.voice.id()
    }

    pub fn start_frame(&self) -> u64 {
        self.voice.start_frame()
    }

    pub fn frame_count(&self) -> u64 {
        self.voice.frame_count()
    }

    /// Seconds on the output clock.
    pub fn start_time(&self) -> f64 {
        self.voice.start_frame() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> f64 {
        self.voice.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn end_time(&self) -> f64 {
        (self.voice.start_frame() + self.voice.frame_count()) as f64 / self.sample_rate as f64
    }

    pub fn state(&self) -> VoiceState {
        self.voice.state()
    }

    /// Resolves once the segment completed, was cancelled, or failed.
    pub async fn finished(&self) -> VoiceState {
        self.voice.done_token().cancelled().await;
        self.voice.state()
    }
}

/// Outcome of one [`PlaybackScheduler::reap`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub completed: Vec<PlaybackId>,
    pub failed: Vec<PlaybackId>,
}

/// Gapless, cancellable scheduling against one output clock.
///
/// Sole owner of the active set and the next-start cursor. Every mutating
/// method takes `&mut self`, so scheduling and cancellation cannot
/// interleave.
pub struct PlaybackScheduler {
    sink: Arc<dyn OutputSink>,
    active: BTreeMap<PlaybackId, Arc<Voice>>,
    /// Next free frame on the output timeline.
    next_frame: u64,
    next_id: u64,
    telemetry: Option<SharedTelemetry>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            active: BTreeMap::new(),
            next_frame: 0,
            next_id: 0,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.sink.channels()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: PlaybackId) -> bool {
        self.active.contains_key(&id)
    }

    /// Where the next segment would start, in seconds.
    pub fn next_start(&self) -> f64 {
        self.next_frame.max(self.sink.position()) as f64 / self.sink.sample_rate() as f64
    }

    /// Convert `audio` to the output's rate and channel layout.
    pub fn prepare(&self, audio: &DecodedAudio) -> Result<PreparedAudio> {
        PreparedAudio::new(audio, self.sink.sample_rate(), self.sink.channels())
    }

    /// Queue `audio` right after everything already scheduled, or now if idle.
    pub fn schedule(&mut self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let prepared = self.prepare(&audio)?;
        self.schedule_prepared(prepared)
    }

    /// [`schedule`](Self::schedule) for audio already converted with [`prepare`](Self::prepare).
    pub fn schedule_prepared(&mut self, audio: PreparedAudio) -> Result<PlaybackHandle> {
        self.reap();

        let sample_rate = self.sink.sample_rate();
        let channels = self.sink.channels();
        if audio.sample_rate() != sample_rate || audio.channels() != channels {
            return Err(PipelineError::MalformedAudio(format!(
                "segment prepared for {}Hz x {} but output is {}Hz x {}",
                audio.sample_rate(),
                audio.channels(),
                sample_rate,
                channels
            )));
        }

        let start_frame = self.sink.position().max(self.next_frame);
        let id = PlaybackId(self.next_id);
        let voice = Arc::new(Voice::new(id, audio.into_frames(), channels, start_frame));

        self.sink.submit(voice.clone())?;

        self.next_id += 1;
        self.next_frame = start_frame + voice.frame_count();
        self.active.insert(id, voice.clone());

        debug!(
            "Scheduled {} at frame {} for {} frames",
            id,
            start_frame,
            voice.frame_count()
        );
        self.record_segment(id, SegmentEventKind::Scheduled, voice.frame_count());

        Ok(PlaybackHandle { voice, sample_rate })
    }

    /// Stop every active segment, started or not, and rewind the clock to now.
    pub fn cancel_all(&mut self) -> usize {
        self.interrupt(InterruptionSource::ExplicitCancel)
    }

    /// Cancel everything then schedule `audio`: new speech always wins.
    ///
    /// Audio that fails to convert leaves current playback alone.
    pub fn speak(&mut self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let prepared = self.prepare(&audio)?;
        self.speak_prepared(prepared)
    }

    pub fn speak_prepared(&mut self, audio: PreparedAudio) -> Result<PlaybackHandle> {
        self.interrupt(InterruptionSource::NewSpeech);
        self.schedule_prepared(audio)
    }

    pub(crate) fn interrupt(&mut self, source: InterruptionSource) -> usize {
        let active = std::mem::take(&mut self.active);
        let mut cancelled = 0;
        for (id, voice) in active {
            if voice.cancel() {
                cancelled += 1;
                self.record_segment(id, SegmentEventKind::Cancelled, voice.frame_count());
            } else {
                // Finished on its own before we got to it.
                self.settle(id, &voice);
            }
        }
        self.next_frame = self.sink.position();

        if cancelled > 0 {
            info!("Cancelled {} playback segment(s) ({:?})", cancelled, source);
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(TelemetryEvent::Interruption { source, cancelled });
        }
        cancelled
    }

    /// Deregister segments that completed or failed since the last pass.
    pub fn reap(&mut self) -> ReapReport {
        self.sink.reclaim();

        let finished: Vec<PlaybackId> = self
            .active
            .iter()
            .filter(|(_, voice)| voice.state().is_terminal())
            .map(|(id, _)| *id)
            .collect();

        let mut report = ReapReport::default();
        for id in finished {
            if let Some(voice) = self.active.remove(&id) {
                match self.settle(id, &voice) {
                    VoiceState::Failed => report.failed.push(id),
                    _ => report.completed.push(id),
                }
            }
        }
        report
    }

    fn settle(&self, id: PlaybackId, voice: &Voice) -> VoiceState {
        let state = voice.state();
        match state {
            VoiceState::Failed => {
                let err = PipelineError::OutputUnavailable(format!("{} dropped mid-playback", id));
                warn!("{}", err);
                self.record_segment(id, SegmentEventKind::Failed, voice.frame_count());
            }
            VoiceState::Completed => {
                debug!("{} completed", id);
                self.record_segment(id, SegmentEventKind::Completed, voice.frame_count());
            }
            _ => {}
        }
        voice.notify_done();
        state
    }

    fn record_segment(&self, playback_id: PlaybackId, event: SegmentEventKind, frames: u64) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(TelemetryEvent::SegmentLifecycle {
                playback_id,
                event,
                frames,
            });
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        for voice in self.active.values() {
            voice.cancel();
        }
    }
}
