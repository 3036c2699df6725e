//! Pluggable provider backends
//!
//! One flat trait per provider role; implementations are selected by the
//! `provider` name in the corresponding config section. The pipeline only
//! ever talks to these traits, so swapping an engine is a config edit.

pub mod llm;
pub mod mock;
pub mod stt;
pub mod tts;
pub mod vad;

use crate::config::{LlmConfig, SttConfig, TtsConfig, VadConfig};
use crate::history::ChatMessage;
use crate::{ParleyError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of reply text fragments; the stream ending is the completion signal
pub type TextStream = BoxStream<'static, Result<String>>;

/// Synthesized audio returned by a TTS provider
#[derive(Clone, Debug)]
pub struct TtsAudio {
    /// Mono samples
    pub samples: Vec<f32>,

    /// Sample rate of `samples`; adapters resample to the boundary rate
    /// before returning
    pub sample_rate: u32,
}

/// Speech-to-text provider
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe one utterance of 16 kHz mono audio to text
    async fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// Language-model provider
#[async_trait]
pub trait LlmProvider: Send {
    /// Stream a reply for the given conversation
    async fn generate(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Switch the model used for subsequent replies
    fn set_model(&mut self, model: String);
}

/// Text-to-speech provider
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize one speakable unit of text
    async fn synthesize(&self, text: &str) -> Result<TtsAudio>;
}

/// Edge events produced by voice-activity detection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadEvent {
    /// The user started speaking
    SpeechStarted,
    /// The user stopped speaking (after the configured hangover)
    SpeechEnded,
}

/// Voice-activity-detection provider
///
/// Stateful per session: it buffers audio internally and reports only
/// speech/silence transitions.
pub trait VadProvider: Send {
    /// Feed one frame of 16 kHz mono audio; returns any transitions it
    /// completed
    fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<VadEvent>>;

    /// Reset detection state
    fn reset(&mut self);
}

/// Build the configured speech-to-text provider
pub fn build_stt(config: &SttConfig) -> Result<Arc<dyn SttProvider>> {
    match config.provider.as_str() {
        "whisper" => Ok(Arc::new(stt::WhisperStt::new(config)?)),
        "mock" => Ok(Arc::new(mock::MockStt::new())),
        other => Err(ParleyError::Config(format!(
            "Unknown STT provider: {}",
            other
        ))),
    }
}

/// Build the configured language-model provider
pub fn build_llm(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai_chat" => Ok(Box::new(llm::OpenAiChatLlm::new(config))),
        "mock" => Ok(Box::new(mock::MockLlm::new())),
        other => Err(ParleyError::Config(format!(
            "Unknown LLM provider: {}",
            other
        ))),
    }
}

/// Build the configured text-to-speech provider
pub fn build_tts(config: &TtsConfig) -> Result<Arc<dyn TtsProvider>> {
    match config.provider.as_str() {
        "vits" => Ok(Arc::new(tts::VitsTtsProvider::new(config)?)),
        "mock" => Ok(Arc::new(mock::MockTts::new())),
        other => Err(ParleyError::Config(format!(
            "Unknown TTS provider: {}",
            other
        ))),
    }
}

/// Build the configured voice-activity-detection provider
pub fn build_vad(config: &VadConfig) -> Result<Box<dyn VadProvider>> {
    match config.provider.as_str() {
        "silero" => Ok(Box::new(vad::SileroVad::new(config)?)),
        "mock" => Ok(Box::new(mock::MockVad::new())),
        other => Err(ParleyError::Config(format!(
            "Unknown VAD provider: {}",
            other
        ))),
    }
}
