//! Error types for the Parley server
//!
//! One error enum covers the whole crate; provider failures carry the
//! upstream detail as a string so they can be forwarded to the client.

use thiserror::Error;

/// Parley server errors
#[derive(Error, Debug, Clone)]
pub enum ParleyError {
    /// Speech-to-text provider failure
    #[error("Speech-to-text error: {0}")]
    Stt(String),

    /// Language-model provider failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech provider failure
    #[error("Text-to-speech error: {0}")]
    Tts(String),

    /// Voice-activity-detection failure
    #[error("Voice activity detection error: {0}")]
    Vad(String),

    /// Malformed or unexpected client message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio processing error
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// File system I/O error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ParleyError {
    fn from(e: std::io::Error) -> Self {
        ParleyError::Io(e.to_string())
    }
}

impl ParleyError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors allow the session to continue (the failure is
    /// reported to the client and the next turn proceeds normally);
    /// non-recoverable errors tear the session down.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Provider calls are transient: retried on the next turn
            ParleyError::Stt(_) => true,
            ParleyError::Llm(_) => true,
            ParleyError::Tts(_) => true,
            ParleyError::Vad(_) => true,
            // Bad client messages are rejected without closing the connection
            ParleyError::Protocol(_) => true,
            // Channel errors indicate a dead pipeline
            ParleyError::Channel(_) => false,
            // Config errors require operator intervention
            ParleyError::Config(_) => false,
            ParleyError::AudioProcessing(_) => true,
            ParleyError::Io(_) => false,
        }
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ParleyError::Stt("timeout".into()).is_recoverable());
        assert!(ParleyError::Tts("synthesis failed".into()).is_recoverable());
        assert!(ParleyError::Protocol("bad json".into()).is_recoverable());
        assert!(!ParleyError::Channel("disconnected".into()).is_recoverable());
        assert!(!ParleyError::Config("missing model".into()).is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ParleyError = io.into();
        assert!(matches!(err, ParleyError::Io(_)));
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ParleyError::Llm("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }
}
