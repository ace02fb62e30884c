/// One block of mono samples delivered by a single capture callback.
///
/// Immutable once built; the buffer only ever reads it back.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    samples: Box<[f32]>,
    sequence: u64,
}

impl SampleChunk {
    pub fn new(samples: Vec<f32>, sequence: u64) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arrival order within the recording, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
