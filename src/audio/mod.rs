pub mod buffer;
pub mod capture;
pub mod chunk;
pub mod recorder;

pub use buffer::SampleBuffer;
pub use capture::{AudioCapture, CaptureStats, CpalInput, InputBackend, SampleSink, SyntheticInput};
pub use chunk::SampleChunk;
pub use recorder::{Recorder, Recording};
