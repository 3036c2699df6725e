//! Server configuration loaded from a TOML file
//!
//! Every subsystem gets its own section with sensible defaults, so a
//! minimal config file only needs the provider-specific paths and URLs.

use crate::{ParleyError, Result};
use serde::Deserialize;
use std::path::Path;

/// Sample rate used everywhere at the session boundary (Hz).
///
/// Providers running at a different rate resample inside their adapter;
/// the pipeline itself never sees anything else.
pub const BOUNDARY_SAMPLE_RATE: u32 = 16_000;

/// Complete application configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP/WebSocket listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Turn pipeline settings (look-ahead, timeouts, framing)
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Reply segmentation settings
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Speech-to-text provider settings
    #[serde(default)]
    pub stt: SttConfig,

    /// Language-model provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Text-to-speech provider settings
    #[serde(default)]
    pub tts: TtsConfig,

    /// Voice-activity-detection provider settings
    #[serde(default)]
    pub vad: VadConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ParleyError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Listener settings
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    12393
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Turn pipeline settings
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    /// Number of reply units synthesized concurrently while earlier units
    /// play (look-ahead depth)
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// Per-unit synthesis timeout in milliseconds; a unit exceeding it is
    /// released as a silent placeholder
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,

    /// Maximum audio chunk length in milliseconds when releasing a unit to
    /// the client (bounds cancellation latency mid-unit)
    #[serde(default = "default_max_chunk_ms")]
    pub max_chunk_ms: u64,

    /// Chunk length used for the lip-sync volume envelope, in milliseconds
    #[serde(default = "default_volume_slice_ms")]
    pub volume_slice_ms: u64,

    /// Command/event channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_lookahead() -> usize {
    2
}

fn default_synthesis_timeout_ms() -> u64 {
    10_000
}

fn default_max_chunk_ms() -> u64 {
    500
}

fn default_volume_slice_ms() -> u64 {
    20
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookahead: default_lookahead(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            max_chunk_ms: default_max_chunk_ms(),
            volume_slice_ms: default_volume_slice_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PipelineConfig {
    /// Set the look-ahead depth
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead.max(1);
        self
    }

    /// Set the per-unit synthesis timeout
    pub fn with_synthesis_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.synthesis_timeout_ms = timeout_ms;
        self
    }
}

/// Reply segmentation settings
#[derive(Clone, Debug, Deserialize)]
pub struct SegmenterConfig {
    /// Characters that terminate a speakable unit
    #[serde(default = "default_terminators")]
    pub terminators: Vec<char>,

    /// Known expression keywords; `[tag]` markers whose tag appears here are
    /// stripped from spoken text and forwarded as timed expression cues.
    /// Unknown bracketed text is spoken/displayed literally.
    #[serde(default = "default_expressions")]
    pub expressions: Vec<String>,
}

fn default_terminators() -> Vec<char> {
    vec!['.', '!', '?', '。', '！', '？', '\n']
}

fn default_expressions() -> Vec<String> {
    ["neutral", "smile", "laugh", "sad", "angry", "surprised"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            terminators: default_terminators(),
            expressions: default_expressions(),
        }
    }
}

impl SegmenterConfig {
    /// Set the terminator set
    pub fn with_terminators(mut self, terminators: impl IntoIterator<Item = char>) -> Self {
        self.terminators = terminators.into_iter().collect();
        self
    }

    /// Set the expression vocabulary
    pub fn with_expressions<S: Into<String>>(
        mut self,
        expressions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.expressions = expressions.into_iter().map(Into::into).collect();
        self
    }
}

/// Speech-to-text provider settings
#[derive(Clone, Debug, Deserialize)]
pub struct SttConfig {
    /// Provider name (`whisper` or `mock`)
    #[serde(default = "default_stt_provider")]
    pub provider: String,

    /// Path to the Whisper model file
    #[serde(default)]
    pub model_path: String,

    /// Language to transcribe (None for auto-detection)
    #[serde(default = "default_stt_language")]
    pub language: Option<String>,

    /// Number of threads to use for transcription
    #[serde(default = "default_stt_threads")]
    pub n_threads: i32,
}

fn default_stt_provider() -> String {
    "whisper".to_string()
}

fn default_stt_language() -> Option<String> {
    Some("en".to_string())
}

fn default_stt_threads() -> i32 {
    4
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: default_stt_provider(),
            model_path: String::new(),
            language: Some("en".to_string()),
            n_threads: default_stt_threads(),
        }
    }
}

/// Language-model provider settings
#[derive(Clone, Debug, Deserialize)]
pub struct LlmConfig {
    /// Provider name (`openai_chat` or `mock`)
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Base URL of an OpenAI-compatible API (e.g. `http://localhost:11434/v1`)
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key, if the endpoint requires one
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// System prompt for the conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_provider() -> String {
    "openai_chat".to_string()
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.1".to_string()
}

fn default_system_prompt() -> String {
    "You are a friendly conversation partner. Keep replies short and \
     conversational; they will be spoken aloud."
        .to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    /// Set the model identifier
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Text-to-speech provider settings
#[derive(Clone, Debug, Deserialize)]
pub struct TtsConfig {
    /// Provider name (`vits` or `mock`)
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    /// Path to the ONNX model file
    #[serde(default)]
    pub model_path: String,

    /// Path to the tokens file
    #[serde(default)]
    pub tokens_path: String,

    /// Path to the lexicon file (optional for some models)
    #[serde(default)]
    pub lexicon_path: Option<String>,

    /// Path to the data directory (optional)
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Speaker ID for multi-speaker models
    #[serde(default)]
    pub speaker_id: i32,

    /// Length scale for speech rate (1.0 = normal, <1.0 = faster)
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
}

fn default_tts_provider() -> String {
    "vits".to_string()
}

fn default_length_scale() -> f32 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            model_path: String::new(),
            tokens_path: String::new(),
            lexicon_path: None,
            data_dir: None,
            speaker_id: 0,
            length_scale: default_length_scale(),
        }
    }
}

/// Voice-activity-detection provider settings
#[derive(Clone, Debug, Deserialize)]
pub struct VadConfig {
    /// Provider name (`silero` or `mock`)
    #[serde(default = "default_vad_provider")]
    pub provider: String,

    /// Probability threshold for speech detection (0.0-1.0)
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,

    /// Silence duration after speech before the utterance is considered
    /// finished, in milliseconds
    #[serde(default = "default_hangover_ms")]
    pub hangover_ms: u64,

    /// Minimum speech duration before a speech-started event fires, in
    /// milliseconds (suppresses clicks and breaths)
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
}

fn default_vad_provider() -> String {
    "silero".to_string()
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_hangover_ms() -> u64 {
    800
}

fn default_min_speech_ms() -> u64 {
    96
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            provider: default_vad_provider(),
            threshold: default_vad_threshold(),
            hangover_ms: default_hangover_ms(),
            min_speech_ms: default_min_speech_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 12393);
        assert_eq!(config.pipeline.lookahead, 2);
        assert!(config.segmenter.terminators.contains(&'.'));
        assert!(config.segmenter.expressions.contains(&"smile".to_string()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [server]
            port = 9000

            [llm]
            model = "qwen2.5"

            [segmenter]
            expressions = ["joy", "anger"]
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.segmenter.expressions, vec!["joy", "anger"]);
        // untouched sections keep defaults
        assert_eq!(config.pipeline.synthesis_timeout_ms, 10_000);
    }

    #[test]
    fn test_builders() {
        let pipeline = PipelineConfig::default()
            .with_lookahead(4)
            .with_synthesis_timeout_ms(2_000);
        assert_eq!(pipeline.lookahead, 4);
        assert_eq!(pipeline.synthesis_timeout_ms, 2_000);

        // look-ahead of zero would stall the stage
        let clamped = PipelineConfig::default().with_lookahead(0);
        assert_eq!(clamped.lookahead, 1);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/nonexistent/parley.toml");
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }
}
