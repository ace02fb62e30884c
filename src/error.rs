use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input (or output) device could not be acquired. Fatal to the current operation.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Byte length or header inconsistent with the declared layout.
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// Output device failed while scheduling or mid-playback.
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("capture already running")]
    AlreadyRunning,

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("playback service closed")]
    ServiceClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        Self::MalformedAudio(err.to_string())
    }
}

impl From<rubato::ResampleError> for PipelineError {
    fn from(err: rubato::ResampleError) -> Self {
        Self::Resample(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for PipelineError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        Self::Resample(err.to_string())
    }
}
