pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod telemetry;

pub use audio::{AudioCapture, Recorder, Recording, SampleBuffer, SampleChunk};
pub use codec::{decode_pcm16, encode_wav, DecodedAudio, EncodedAudio};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use playback::{PlaybackController, PlaybackHandle, PlaybackScheduler, VoiceState};
