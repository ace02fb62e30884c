use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::voice::Voice;
use crate::error::{PipelineError, Result};

/// Scheduler-facing side of an output device.
///
/// Object safe so the scheduler can hold `Arc<dyn OutputSink>` for either
/// the cpal device or an offline renderer.
pub trait OutputSink: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Frames rendered so far: the output clock.
    fn position(&self) -> u64;

    /// Hand a voice to the render side.
    fn submit(&self, voice: Arc<Voice>) -> Result<()>;

    /// Drop voices the render side has let go of. Returns how many.
    fn reclaim(&self) -> usize {
        0
    }

    fn now(&self) -> f64 {
        self.position() as f64 / self.sample_rate() as f64
    }
}

/// Render side. Lives inside the output callback; never blocks, never
/// allocates, never frees a voice.
pub struct Mixer {
    incoming: HeapCons<Arc<Voice>>,
    /// Finished voices go back to the scheduler thread to be dropped there.
    retired: HeapProd<Arc<Voice>>,
    voices: Vec<Arc<Voice>>,
    channels: usize,
    gain: f32,
    position: Arc<AtomicU64>,
    fault: Arc<AtomicBool>,
}

/// Shared handle to a [`Mixer`]: the producer half of its voice queue plus its clock.
pub struct MixerSink {
    producer: Mutex<HeapProd<Arc<Voice>>>,
    retired: Mutex<HeapCons<Arc<Voice>>>,
    position: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16, gain: f32, queue: usize) -> (Self, MixerSink) {
        let slots = queue.max(1) * 2;
        let (producer, incoming) = HeapRb::<Arc<Voice>>::new(queue.max(1)).split();
        let (retire_tx, retire_rx) = HeapRb::<Arc<Voice>>::new(slots).split();
        let position = Arc::new(AtomicU64::new(0));

        let mixer = Self {
            incoming,
            retired: retire_tx,
            voices: Vec::with_capacity(slots),
            channels: channels.max(1) as usize,
            gain,
            position: position.clone(),
            fault: Arc::new(AtomicBool::new(false)),
        };
        let sink = MixerSink {
            producer: Mutex::new(producer),
            retired: Mutex::new(retire_rx),
            position,
            closed: Arc::new(AtomicBool::new(false)),
            sample_rate,
            channels: channels.max(1),
        };
        (mixer, sink)
    }

    /// Set by a device error callback; voices audible at the next render fail.
    pub fn fault_flag(&self) -> Arc<AtomicBool> {
        self.fault.clone()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` (interleaved) with the mix and advance the clock.
    ///
    /// Voices keep their scheduled frames. One that arrives after its start
    /// loses the frames already rendered rather than sliding later.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        let n_frames = (out.len() / channels) as u64;
        let base = self.position.load(Ordering::Acquire);
        let window_end = base + n_frames;

        // Capacity is fixed; anything beyond it waits in the queue.
        while self.voices.len() < self.voices.capacity() {
            match self.incoming.try_pop() {
                Some(voice) => self.voices.push(voice),
                None => break,
            }
        }

        out.fill(0.0);
        let fault = self.fault.swap(false, Ordering::AcqRel);
        let gain = self.gain;
        let retired = &mut self.retired;
        // Keep a voice we couldn't hand back; try again next render.
        let mut retire = |voice: &Arc<Voice>| retired.try_push(voice.clone()).is_err();

        self.voices.retain(|voice| {
            if voice.state().is_terminal() {
                return retire(voice);
            }

            let start = voice.start_frame();
            let end = start + voice.frame_count();
            let audible = start < window_end && base < end;
            if fault && audible {
                voice.mark_failed();
                return retire(voice);
            }

            if audible {
                voice.mark_playing();
                let from = start.max(base);
                let to = end.min(window_end);
                let samples = voice.samples();
                for frame in from..to {
                    let src = (frame - start) as usize * channels;
                    let dst = (frame - base) as usize * channels;
                    for c in 0..channels {
                        out[dst + c] += samples[src + c] * gain;
                    }
                }
            }

            if end <= window_end {
                voice.mark_completed();
                return retire(voice);
            }
            true
        });

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.position.store(window_end, Ordering::Release);
    }
}

impl MixerSink {
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl OutputSink for MixerSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    fn submit(&self, voice: Arc<Voice>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::OutputUnavailable("output device closed".into()));
        }
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_push(voice)
            .map_err(|_| PipelineError::OutputUnavailable("voice queue full".into()))
    }

    fn reclaim(&self) -> usize {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        while retired.try_pop().is_some() {
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::voice::{PlaybackId, VoiceState};

    #[test]
    fn test_mix_and_complete() {
        let (mut mixer, sink) = Mixer::new(10, 1, 1.0, 4);
        let a = Arc::new(Voice::new(PlaybackId(0), vec![0.25; 3], 1, 0));
        let b = Arc::new(Voice::new(PlaybackId(1), vec![0.5; 2], 1, 3));
        sink.submit(a.clone()).unwrap();
        sink.submit(b.clone()).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.5]);
        assert_eq!(a.state(), VoiceState::Completed);
        assert_eq!(b.state(), VoiceState::Playing);

        mixer.render(&mut out);
        assert_eq!(out, vec![0.5, 0.0, 0.0, 0.0]);
        assert_eq!(b.state(), VoiceState::Completed);
        assert_eq!(sink.position(), 8);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_gain_and_clamp() {
        let (mut mixer, sink) = Mixer::new(10, 1, 2.0, 4);
        sink.submit(Arc::new(Voice::new(PlaybackId(0), vec![0.25, 0.9], 1, 0)))
            .unwrap();
        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.5, 1.0]);
    }

    #[test]
    fn test_late_voice_keeps_its_slot() {
        let (mut mixer, sink) = Mixer::new(10, 1, 1.0, 4);
        let mut out = vec![0.0; 100];
        mixer.render(&mut out);

        // Both arrive after frame 100; a was due at 0, b follows a.
        let a = Arc::new(Voice::new(PlaybackId(0), vec![0.25; 200], 1, 0));
        let b = Arc::new(Voice::new(PlaybackId(1), vec![0.5; 200], 1, 200));
        sink.submit(a.clone()).unwrap();
        sink.submit(b.clone()).unwrap();

        let mut out = vec![0.0; 400];
        mixer.render(&mut out);
        assert!(out[..100].iter().all(|&s| s == 0.25));
        assert!(out[100..300].iter().all(|&s| s == 0.5));
        assert!(out[300..].iter().all(|&s| s == 0.0));
        assert_eq!(a.state(), VoiceState::Completed);
        assert_eq!(b.state(), VoiceState::Completed);
    }

    #[test]
    fn test_voice_entirely_in_the_past_is_silent() {
        let (mut mixer, sink) = Mixer::new(10, 1, 1.0, 4);
        let mut out = vec![0.0; 50];
        mixer.render(&mut out);

        let stale = Arc::new(Voice::new(PlaybackId(0), vec![0.9; 20], 1, 10));
        sink.submit(stale.clone()).unwrap();
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(stale.state(), VoiceState::Completed);
    }

    #[test]
    fn test_finished_voices_are_released_off_the_render_side() {
        let (mut mixer, sink) = Mixer::new(10, 1, 1.0, 4);
        let done = Arc::new(Voice::new(PlaybackId(0), vec![0.1; 2], 1, 0));
        let cut = Arc::new(Voice::new(PlaybackId(1), vec![0.1; 50], 1, 2));
        sink.submit(done.clone()).unwrap();
        sink.submit(cut.clone()).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        cut.cancel();
        mixer.render(&mut out);
        assert_eq!(mixer.active_voices(), 0);

        // The mixer no longer owns them; the retire queue still does.
        assert_eq!(Arc::strong_count(&done), 2);
        assert_eq!(Arc::strong_count(&cut), 2);
        assert_eq!(sink.reclaim(), 2);
        assert_eq!(Arc::strong_count(&done), 1);
        assert_eq!(Arc::strong_count(&cut), 1);
    }

    #[test]
    fn test_queue_full() {
        let (_mixer, sink) = Mixer::new(10, 1, 1.0, 1);
        sink.submit(Arc::new(Voice::new(PlaybackId(0), vec![], 1, 0))).unwrap();
        let err = sink
            .submit(Arc::new(Voice::new(PlaybackId(1), vec![], 1, 0)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutputUnavailable(_)));
    }
}
