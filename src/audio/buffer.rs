use super::chunk::SampleChunk;

/// Chunks of the current recording, in arrival order.
///
/// Not internally synchronized: the recorder wraps it in a mutex that is
/// only contended by the collector thread, never by the device callback.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    chunks: Vec<SampleChunk>,
    total: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: SampleChunk) {
        self.total += chunk.len();
        self.chunks.push(chunk);
    }

    /// Concatenate every chunk into one contiguous array and reset.
    ///
    /// Allocates once: the total is tracked on append.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut merged = Vec::with_capacity(self.total);
        for chunk in self.chunks.drain(..) {
            merged.extend_from_slice(chunk.samples());
        }
        self.total = 0;
        merged
    }

    /// Total sample count across all chunks.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.total as f64 / sample_rate as f64
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_resets() {
        let mut buffer = SampleBuffer::new();
        buffer.append(SampleChunk::new(vec![0.1, 0.2], 0));
        buffer.append(SampleChunk::new(vec![0.3], 1));
        buffer.append(SampleChunk::new(vec![0.4, 0.5, 0.6], 2));
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.chunk_count(), 3);

        let merged = buffer.drain();
        assert_eq!(merged, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn drain_empty() {
        let mut buffer = SampleBuffer::new();
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn duration() {
        let mut buffer = SampleBuffer::new();
        buffer.append(SampleChunk::new(vec![0.0; 8000], 0));
        assert_eq!(buffer.duration_secs(16_000), 0.5);
        assert_eq!(buffer.duration_secs(0), 0.0);
    }
}
