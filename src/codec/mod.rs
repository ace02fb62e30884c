//! WAV encoding, PCM16 decoding and the base64 transport helpers.

pub mod pcm;
pub mod transport;
pub mod wav;

pub use pcm::{decode_base64_pcm16, decode_pcm16, DecodedAudio};
pub use wav::{encode_wav, EncodedAudio, WavHeader};
