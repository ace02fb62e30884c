//! Pipeline telemetry.
//!
//! A side-effect layer: nothing in capture or playback reads it back to make
//! decisions. Events carry ids, counts and frame totals only, never audio.

pub mod event;
pub mod metrics;
pub mod recorder;

use std::sync::{Arc, Mutex, PoisonError};

pub use event::{InterruptionSource, SegmentEventKind, TelemetryEvent};
pub use metrics::{compute_snapshot, TelemetrySnapshot};
pub use recorder::TelemetryRecorder;

/// Cloneable handle onto one [`TelemetryRecorder`].
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetry {
    inner: Arc<Mutex<TelemetryRecorder>>,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TelemetryEvent) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events()
            .cloned()
            .collect()
    }
}
