//! Whisper speech-to-text provider
//!
//! Wraps whisper.cpp via `whisper-rs`. The context is loaded once and shared
//! across sessions; each transcription gets its own inference state.

use crate::config::SttConfig;
use crate::providers::SttProvider;
use crate::{ParleyError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper-backed STT provider
pub struct WhisperStt {
    context: WhisperContext,
    language: Option<String>,
    n_threads: i32,
}

impl WhisperStt {
    /// Load the Whisper model named in the config
    pub fn new(config: &SttConfig) -> Result<Self> {
        if config.model_path.is_empty() {
            return Err(ParleyError::Config(
                "stt.model_path is required for the whisper provider".into(),
            ));
        }
        if !Path::new(&config.model_path).exists() {
            return Err(ParleyError::Config(format!(
                "Whisper model not found: {}",
                config.model_path
            )));
        }

        info!("Loading Whisper model from: {}", config.model_path);
        let context = WhisperContext::new_with_params(
            &config.model_path,
            WhisperContextParameters::default(),
        )
        .map_err(|e| ParleyError::Stt(format!("Failed to load Whisper model: {:?}", e)))?;
        info!("Whisper model loaded");

        Ok(Self {
            context,
            language: config.language.clone(),
            n_threads: config.n_threads,
        })
    }

    fn transcribe_sync(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(ParleyError::Stt("Empty audio segment".into()));
        }

        debug!(
            "Transcribing {} samples ({:.2}s)",
            samples.len(),
            samples.len() as f32 / 16_000.0
        );

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        if let Some(lang) = &self.language {
            params.set_language(Some(lang.as_str()));
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| ParleyError::Stt(format!("Failed to create state: {:?}", e)))?;

        state
            .full(params, samples)
            .map_err(|e| ParleyError::Stt(format!("Transcription failed: {:?}", e)))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| ParleyError::Stt(format!("Failed to get segments: {:?}", e)))?;

        let mut text = String::new();
        for i in 0..num_segments {
            let segment = state
                .full_get_segment_text(i)
                .map_err(|e| ParleyError::Stt(format!("Failed to get segment text: {:?}", e)))?;
            text.push_str(&segment);
        }

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl SttProvider for WhisperStt {
    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        // whisper.cpp inference is synchronous CPU work; callers run it on a
        // dedicated worker thread, so blocking here is fine
        self.transcribe_sync(samples)
    }
}
