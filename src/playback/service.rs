//! Async front for the scheduler.
//!
//! One task owns the [`PlaybackScheduler`]; every caller goes through a
//! [`PlaybackController`]. Commands are handled one at a time, so a
//! `speak` (cancel then schedule) can never interleave with another caller.
//! Rate and channel conversion happens on the blocking pool before a command
//! is sent, so the owning task only touches the clock and the active set.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::layout::PreparedAudio;
use super::scheduler::{PlaybackHandle, PlaybackScheduler};
use crate::codec::DecodedAudio;
use crate::config::PlaybackConfig;
use crate::error::{PipelineError, Result};
use crate::telemetry::InterruptionSource;

enum Command {
    Schedule {
        audio: PreparedAudio,
        reply: oneshot::Sender<Result<PlaybackHandle>>,
    },
    Speak {
        audio: PreparedAudio,
        reply: oneshot::Sender<Result<PlaybackHandle>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    ActiveCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Cheap to clone; the service stops once every controller is dropped.
#[derive(Clone)]
pub struct PlaybackController {
    tx: mpsc::Sender<Command>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackController {
    pub async fn schedule(&self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let audio = self.prepare(audio).await?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Schedule { audio, reply }).await?;
        rx.await.map_err(|_| PipelineError::ServiceClosed)?
    }

    /// Cut off whatever is playing and start `audio` now.
    pub async fn speak(&self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let audio = self.prepare(audio).await?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Speak { audio, reply }).await?;
        rx.await.map_err(|_| PipelineError::ServiceClosed)?
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelAll { reply }).await?;
        rx.await.map_err(|_| PipelineError::ServiceClosed)
    }

    pub async fn active_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveCount { reply }).await?;
        rx.await.map_err(|_| PipelineError::ServiceClosed)
    }

    async fn prepare(&self, audio: DecodedAudio) -> Result<PreparedAudio> {
        let (sample_rate, channels) = (self.sample_rate, self.channels);
        tokio::task::spawn_blocking(move || PreparedAudio::new(&audio, sample_rate, channels))
            .await
            .map_err(|e| PipelineError::Resample(format!("conversion task failed: {}", e)))?
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| PipelineError::ServiceClosed)
    }
}

pub struct PlaybackService {
    scheduler: PlaybackScheduler,
    rx: mpsc::Receiver<Command>,
    reap_interval: Duration,
}

impl PlaybackService {
    /// Move `scheduler` onto a tokio task. Must be called inside a runtime.
    pub fn spawn(
        scheduler: PlaybackScheduler,
        config: &PlaybackConfig,
    ) -> (PlaybackController, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.voice_queue.max(1));
        let controller = PlaybackController {
            tx,
            sample_rate: scheduler.sample_rate(),
            channels: scheduler.channels(),
        };
        let service = Self {
            scheduler,
            rx,
            reap_interval: Duration::from_millis(config.reap_interval_ms.max(1)),
        };
        let task = tokio::spawn(service.run());
        (controller, task)
    }

    async fn run(mut self) {
        info!(
            "Playback service started. Reap every {}ms",
            self.reap_interval.as_millis()
        );

        let mut cadence = interval(self.reap_interval);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cadence.tick() => {
                    let report = self.scheduler.reap();
                    if !report.completed.is_empty() || !report.failed.is_empty() {
                        debug!(
                            "Reaped {} completed, {} failed",
                            report.completed.len(),
                            report.failed.len()
                        );
                    }
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        let cancelled = self.scheduler.interrupt(InterruptionSource::Shutdown);
        info!("Playback service stopped ({} segment(s) cut)", cancelled);
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply just means the caller stopped waiting.
        match command {
            Command::Schedule { audio, reply } => {
                let _ = reply.send(self.scheduler.schedule_prepared(audio));
            }
            Command::Speak { audio, reply } => {
                let _ = reply.send(self.scheduler.speak_prepared(audio));
            }
            Command::CancelAll { reply } => {
                let _ = reply.send(self.scheduler.cancel_all());
            }
            Command::ActiveCount { reply } => {
                self.scheduler.reap();
                let _ = reply.send(self.scheduler.active_count());
            }
        }
    }
}
