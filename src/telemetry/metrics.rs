use std::collections::VecDeque;

use serde::Serialize;

use super::event::{SegmentEventKind, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub recording_stats: RecordingStats,
    pub playback_stats: PlaybackStats,
    pub interruption_stats: InterruptionStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingStats {
    pub started: u64,
    pub completed: u64,
    pub total_samples: u64,
    pub total_chunks: u64,
    pub total_overruns: u64,
    pub avg_samples: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStats {
    pub scheduled: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub scheduled_frames: u64,
    pub completed_frames: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterruptionStats {
    pub count: u64,
    /// Interruptions that actually stopped something.
    pub effective: u64,
    pub segments_cancelled: u64,
    pub avg_cancelled: f64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    for event in events {
        match event {
            TelemetryEvent::RecordingStarted { .. } => {
                snap.recording_stats.started += 1;
            }
            TelemetryEvent::RecordingStopped {
                samples,
                chunks,
                overruns,
                ..
            } => {
                snap.recording_stats.completed += 1;
                snap.recording_stats.total_samples += samples;
                snap.recording_stats.total_chunks += chunks;
                snap.recording_stats.total_overruns += overruns;
            }
            TelemetryEvent::SegmentLifecycle { event, frames, .. } => match event {
                SegmentEventKind::Scheduled => {
                    snap.playback_stats.scheduled += 1;
                    snap.playback_stats.scheduled_frames += frames;
                }
                SegmentEventKind::Completed => {
                    snap.playback_stats.completed += 1;
                    snap.playback_stats.completed_frames += frames;
                }
                SegmentEventKind::Cancelled => snap.playback_stats.cancelled += 1,
                SegmentEventKind::Failed => snap.playback_stats.failed += 1,
            },
            TelemetryEvent::Interruption { cancelled, .. } => {
                snap.interruption_stats.count += 1;
                snap.interruption_stats.segments_cancelled += *cancelled as u64;
                if *cancelled > 0 {
                    snap.interruption_stats.effective += 1;
                }
            }
        }
    }

    if snap.recording_stats.completed > 0 {
        snap.recording_stats.avg_samples =
            snap.recording_stats.total_samples as f64 / snap.recording_stats.completed as f64;
    }

    if snap.interruption_stats.count > 0 {
        snap.interruption_stats.avg_cancelled = snap.interruption_stats.segments_cancelled as f64
            / snap.interruption_stats.count as f64;
    }

    snap
}
