use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pb-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoiceState {
    /// Scheduled, start time not reached yet.
    Pending = 0,
    Playing = 1,
    Completed = 2,
    Cancelled = 3,
    /// Output device errored while this voice was audible.
    Failed = 4,
}

impl VoiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Playing,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// One scheduled source: interleaved frames already in the sink's layout.
///
/// State is a single atomic so the output callback can read and advance it
/// without locking. `done` is fired off the real-time path, by the
/// scheduler.
#[derive(Debug)]
pub struct Voice {
    id: PlaybackId,
    frames: Box<[f32]>,
    channels: u16,
    start_frame: u64,
    state: AtomicU8,
    done: CancellationToken,
}

impl Voice {
    pub fn new(id: PlaybackId, frames: Vec<f32>, channels: u16, start_frame: u64) -> Self {
        Self {
            id,
            frames: frames.into_boxed_slice(),
            channels: channels.max(1),
            start_frame,
            state: AtomicU8::new(VoiceState::Pending as u8),
            done: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub fn samples(&self) -> &[f32] {
        &self.frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frame_count(&self) -> u64 {
        (self.frames.len() / self.channels as usize) as u64
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn state(&self) -> VoiceState {
        VoiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from a live state to `to`. Terminal states are sticky.
    fn transition(&self, to: VoiceState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if VoiceState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn mark_playing(&self) {
        let _ = self
            .state
            .compare_exchange(
                VoiceState::Pending as u8,
                VoiceState::Playing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
    }

    pub(crate) fn mark_completed(&self) -> bool {
        self.transition(VoiceState::Completed)
    }

    pub(crate) fn mark_failed(&self) -> bool {
        self.transition(VoiceState::Failed)
    }

    /// Stop immediately, whether or not playback has begun.
    pub fn cancel(&self) -> bool {
        let changed = self.transition(VoiceState::Cancelled);
        self.done.cancel();
        changed
    }

    pub(crate) fn notify_done(&self) {
        self.done.cancel();
    }

    pub(crate) fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let voice = Voice::new(PlaybackId(1), vec![0.0; 4], 1, 0);
        assert_eq!(voice.state(), VoiceState::Pending);
        voice.mark_playing();
        assert_eq!(voice.state(), VoiceState::Playing);
        assert!(voice.cancel());
        assert!(!voice.mark_completed());
        assert_eq!(voice.state(), VoiceState::Cancelled);
    }

    #[test]
    fn frame_count_uses_channels() {
        let voice = Voice::new(PlaybackId(2), vec![0.0; 10], 2, 0);
        assert_eq!(voice.frame_count(), 5);
    }
}
