//! Parley - real-time spoken conversation server with interruptible,
//! lip-synced replies
//!
//! One WebSocket session per client drives a hands-free conversation loop:
//! microphone audio in, voice-activity detection, transcription, a streaming
//! language-model reply segmented into sentences, look-ahead synthesis, and
//! strictly-ordered playback with timed expression events for an animated
//! face. The user can barge in at any moment; the reply in flight is
//! cancelled cooperatively and the conversation folds back into listening.

pub mod audio;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod playback;
pub mod providers;
pub mod reply;
pub mod stage;
pub mod synth;
pub mod turn;

// Re-export error types
pub use error::{ParleyError, Result};

// Re-export the core pipeline types
pub use config::{AppConfig, BOUNDARY_SAMPLE_RATE};
pub use history::{ChatMessage, ChatRole, ConversationHistory};
pub use reply::{ExpressionCue, SpeakableUnit, UtteranceSegmenter};
pub use synth::{AudioUnit, ExpressionEvent, ReorderBuffer, SynthStage};
pub use turn::{
    CancelToken, ControlSignal, SessionCommand, SessionEvent, SessionProviders, Turn, TurnState,
};
