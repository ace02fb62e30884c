//! Gapless, cancellable playback against a sample-accurate output clock.

pub mod layout;
pub mod mixer;
pub mod output;
pub mod scheduler;
pub mod service;
pub mod voice;

pub use layout::PreparedAudio;
pub use mixer::{Mixer, MixerSink, OutputSink};
pub use output::{CpalOutput, OfflineOutput};
pub use scheduler::{PlaybackHandle, PlaybackScheduler, ReapReport};
pub use service::{PlaybackController, PlaybackService};
pub use voice::{PlaybackId, Voice, VoiceState};
