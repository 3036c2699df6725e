//! Worker threads wrapping the async providers
//!
//! Each stage runs one dedicated thread with its own tokio runtime, takes
//! commands over a bounded channel, and reports results as events. The turn
//! controller composes them without ever blocking on provider I/O itself.

pub mod llm;
pub mod stt;

pub use llm::{LlmEvent, LlmStage};
pub use stt::{SttEvent, SttStage};
