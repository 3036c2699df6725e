//! Turn lifecycle: state machine data model, cancellation, session commands
//! and events
//!
//! A [`Turn`] covers one listening → thinking → speaking cycle. At most one
//! turn is active per session; its [`CancelToken`] is the single cooperative
//! cancellation signal shared by every pipeline stage.

pub mod controller;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub use controller::{spawn_session, SessionProviders};

/// Conversation turn state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No session activity yet
    #[default]
    Idle,
    /// Capturing microphone audio, waiting for an utterance
    Listening,
    /// Transcript accepted, language model streaming a reply
    Thinking,
    /// Synthesis and playback pipeline active
    Speaking,
    /// Reply cancelled by barge-in; folds immediately into `Listening`
    Interrupted,
}

impl TurnState {
    /// Check if a reply is in flight (interruptible)
    pub fn is_replying(&self) -> bool {
        matches!(self, TurnState::Thinking | TurnState::Speaking)
    }

    /// Check if the session is waiting for user speech
    pub fn is_listening(&self) -> bool {
        matches!(self, TurnState::Listening)
    }

    /// Check if idle
    pub fn is_idle(&self) -> bool {
        matches!(self, TurnState::Idle)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Idle => write!(f, "idle"),
            TurnState::Listening => write!(f, "listening"),
            TurnState::Thinking => write!(f, "thinking"),
            TurnState::Speaking => write!(f, "speaking"),
            TurnState::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Cooperative cancellation signal for one turn
///
/// Set at most once; every synthesis worker checks it before and after the
/// provider call, the sequencer checks it before each release, and the
/// controller checks it before state transitions. Work finishing after the
/// token is set is discarded silently.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token; idempotent
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether the token has been set
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One conversational turn
#[derive(Clone, Debug)]
pub struct Turn {
    /// Unique turn identifier; stage events are filtered by it so late
    /// events from a cancelled turn are dropped
    pub turn_id: Uuid,

    /// When the turn was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Cancellation signal for everything belonging to this turn
    pub cancel: CancelToken,
}

impl Turn {
    /// Create a new turn with a fresh cancel token
    pub fn new() -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            cancel: CancelToken::new(),
        }
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound commands for a session, dispatched by the gateway
#[derive(Clone, Debug)]
pub enum SessionCommand {
    /// One frame of 16 kHz mono microphone audio
    AudioFrame(Vec<f32>),

    /// Typed user input, bypassing speech recognition
    TextInput(String),

    /// Explicit interruption request from the client
    Interrupt,

    /// Switch the language model
    SetModel(String),

    /// Clear the conversation history
    ClearHistory,

    /// Connection lost or closing; tear the session down
    Disconnect,
}

/// Discrete control notifications sent to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Session is set up and listening
    Ready,
    /// A reply turn has started
    TurnStart,
    /// The current reply turn ended (completed or interrupted)
    TurnEnd,
    /// Playback was cut short; the client should flush its audio queue
    PlaybackStopped,
}

/// Outbound events produced by the pipeline, serialized by the gateway
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Turn state changed
    State(TurnState),

    /// Final transcript of what the user said
    Transcript(String),

    /// Control notification
    Control(ControlSignal),

    /// A batch of synthesized audio, in release order
    AudioChunk {
        /// Sequence of the unit this audio belongs to
        sequence: u64,
        /// 16 kHz mono samples
        samples: Vec<f32>,
        /// Display text, present on the first chunk of each unit
        text: Option<String>,
    },

    /// A timed expression change, interleaved with the audio stream
    Expression {
        /// Sequence of the unit the expression belongs to
        sequence: u64,
        /// Expression keyword
        tag: String,
        /// Offset from the start of the unit's audio, in milliseconds
        offset_ms: u64,
    },

    /// Non-fatal pipeline error
    Error {
        /// Affected unit sequence, if the error is unit-scoped
        sequence: Option<u64>,
        /// Human-readable reason
        reason: String,
    },
}
