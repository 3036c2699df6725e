//! VITS text-to-speech provider via sherpa-onnx
//!
//! Wraps `sherpa_rs::tts::VitsTts`. The engine's `create` takes `&mut self`,
//! so it sits behind a mutex and the provider is shared across sessions.
//! Output is resampled to the boundary rate here, at the adapter edge.

use crate::audio::resample;
use crate::config::{TtsConfig, BOUNDARY_SAMPLE_RATE};
use crate::providers::{TtsAudio, TtsProvider};
use crate::{ParleyError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sherpa_rs::tts::{VitsTts, VitsTtsConfig};
use std::path::Path;
use tracing::{debug, info};

/// VITS-backed TTS provider
pub struct VitsTtsProvider {
    engine: Mutex<VitsTts>,
    speaker_id: i32,
}

impl VitsTtsProvider {
    /// Load the VITS model named in the config
    pub fn new(config: &TtsConfig) -> Result<Self> {
        if config.model_path.is_empty() || config.tokens_path.is_empty() {
            return Err(ParleyError::Config(
                "tts.model_path and tts.tokens_path are required for the vits provider".into(),
            ));
        }
        for path in [&config.model_path, &config.tokens_path] {
            if !Path::new(path).exists() {
                return Err(ParleyError::Config(format!("TTS file not found: {}", path)));
            }
        }

        info!("Loading VITS TTS model from: {}", config.model_path);
        let vits_config = VitsTtsConfig {
            model: config.model_path.clone(),
            tokens: config.tokens_path.clone(),
            lexicon: config.lexicon_path.clone().unwrap_or_default(),
            data_dir: config.data_dir.clone().unwrap_or_default(),
            length_scale: config.length_scale,
            ..Default::default()
        };
        let engine = VitsTts::new(vits_config);
        info!("VITS TTS model loaded");

        Ok(Self {
            engine: Mutex::new(engine),
            speaker_id: config.speaker_id,
        })
    }
}

#[async_trait]
impl TtsProvider for VitsTtsProvider {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
        let normalized = normalize_for_synthesis(text);
        if normalized.is_empty() {
            return Ok(TtsAudio {
                samples: Vec::new(),
                sample_rate: BOUNDARY_SAMPLE_RATE,
            });
        }

        debug!("Synthesizing: {}", normalized);
        let audio = {
            let mut engine = self.engine.lock();
            engine
                .create(&normalized, self.speaker_id, 1.0)
                .map_err(|e| ParleyError::Tts(format!("Synthesis failed: {}", e)))?
        };

        let model_rate = audio.sample_rate as u32;
        let samples = if model_rate != BOUNDARY_SAMPLE_RATE {
            resample(&audio.samples, model_rate, BOUNDARY_SAMPLE_RATE)?
        } else {
            audio.samples
        };

        debug!(
            "Synthesized {} samples ({:.2}s)",
            samples.len(),
            samples.len() as f32 / BOUNDARY_SAMPLE_RATE as f32
        );

        Ok(TtsAudio {
            samples,
            sample_rate: BOUNDARY_SAMPLE_RATE,
        })
    }
}

/// Prepare text for the acoustic model
///
/// Spells out symbols the model has no phonemes for, collapses whitespace,
/// and drops characters that tend to produce artifacts.
pub fn normalize_for_synthesis(text: &str) -> String {
    let mut result = text.to_string();

    for (symbol, spoken) in [
        ("&", " and "),
        ("%", " percent"),
        ("@", " at "),
        ("#", " number "),
        ("$", " dollars "),
        ("€", " euros "),
        ("+", " plus "),
        ("=", " equals "),
    ] {
        result = result.replace(symbol, spoken);
    }

    let filtered: String = result
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,!?;:'-\"".contains(*c))
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}
