use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::playback::PlaybackId;

// Allowed: ids, counts, frame totals, enums.
// Never: sample data, encoded bytes.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    RecordingStarted {
        recording_id: Uuid,
    },

    RecordingStopped {
        recording_id: Uuid,
        samples: u64,
        chunks: u64,
        overruns: u64,
    },

    SegmentLifecycle {
        playback_id: PlaybackId,
        event: SegmentEventKind,
        frames: u64,
    },

    Interruption {
        source: InterruptionSource,
        cancelled: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentEventKind {
    Scheduled,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionSource {
    /// A new utterance replaced whatever was playing.
    NewSpeech,
    ExplicitCancel,
    Shutdown,
}
