//! Wire protocol for one client session
//!
//! JSON text frames, tagged with `type`. Inbound microphone audio arrives as
//! raw 16 kHz float samples; outbound synthesized audio leaves as base64 WAV
//! with a normalized volume envelope the client uses for lip sync.

use crate::audio::{encode_wav, volume_envelope};
use crate::turn::{ControlSignal, SessionEvent, TurnState};
use crate::Result;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages the client sends to the server
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One frame of microphone audio, 16 kHz mono
    AudioChunk { samples: Vec<f32> },

    /// Typed input, bypassing speech recognition
    TextInput { text: String },

    /// Cancel the reply in flight
    Interrupt,

    /// Switch the language model
    SetModel { model: String },

    /// Clear the conversation history
    ClearHistory,

    /// Anything this server version does not understand
    #[serde(other)]
    Unknown,
}

/// Messages the server sends to the client
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Final transcript of what the user said
    Transcript { text: String },

    /// Synthesized audio for playback
    AudioChunk {
        /// Unit sequence this audio belongs to
        sequence: u64,
        /// Base64-encoded 16-bit mono WAV
        audio: String,
        /// Normalized per-slice RMS volumes for mouth movement
        volumes: Vec<f32>,
        /// Volume slice length in milliseconds
        slice_length_ms: u64,
        /// Display text, present on the first chunk of a unit
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Timed expression change, interleaved with the audio stream
    Expression {
        sequence: u64,
        tag: String,
        offset_ms: u64,
    },

    /// Turn controller state
    State { state: TurnState },

    /// Control notification
    Control { event: ControlSignal },

    /// Non-fatal error
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        reason: String,
    },
}

impl ServerMessage {
    /// Convert a pipeline event into its wire form
    pub fn from_event(event: SessionEvent, sample_rate: u32, slice_ms: u64) -> Result<Self> {
        Ok(match event {
            SessionEvent::State(state) => ServerMessage::State { state },
            SessionEvent::Transcript(text) => ServerMessage::Transcript { text },
            SessionEvent::Control(signal) => ServerMessage::Control { event: signal },
            SessionEvent::AudioChunk {
                sequence,
                samples,
                text,
            } => {
                let wav = encode_wav(&samples, sample_rate)?;
                ServerMessage::AudioChunk {
                    sequence,
                    audio: base64::engine::general_purpose::STANDARD.encode(wav),
                    volumes: volume_envelope(&samples, sample_rate, slice_ms),
                    slice_length_ms: slice_ms,
                    text,
                }
            }
            SessionEvent::Expression {
                sequence,
                tag,
                offset_ms,
            } => ServerMessage::Expression {
                sequence,
                tag,
                offset_ms,
            },
            SessionEvent::Error { sequence, reason } => ServerMessage::Error { sequence, reason },
        })
    }
}
