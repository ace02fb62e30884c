//! Base64 transport encoding used when handing audio to remote collaborators.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{PipelineError, Result};

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| PipelineError::MalformedAudio(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_value() {
        assert_eq!(encode_base64(b"RIFF"), "UklGRg==");
        assert_eq!(decode_base64("UklGRg==\n").unwrap(), b"RIFF");
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            decode_base64("not*base64"),
            Err(PipelineError::MalformedAudio(_))
        ));
    }
}
