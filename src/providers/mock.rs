//! Deterministic providers for tests and provider-free development
//!
//! Each mock is scriptable: transcripts, replies, per-text synthesis
//! latencies and failures, and frame-indexed VAD events. The pipeline under
//! test is the real one; only the engines are simulated.

use crate::config::BOUNDARY_SAMPLE_RATE;
use crate::history::ChatMessage;
use crate::providers::{
    LlmProvider, SttProvider, TextStream, TtsAudio, TtsProvider, VadEvent, VadProvider,
};
use crate::{ParleyError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Scripted speech-to-text
///
/// Returns queued transcripts in order; an empty queue transcribes to an
/// empty string.
#[derive(Default)]
pub struct MockStt {
    transcripts: Mutex<VecDeque<String>>,
}

impl MockStt {
    /// Create a mock with no scripted transcripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue transcripts to be returned by successive calls
    pub fn with_transcripts<S: Into<String>>(self, transcripts: impl IntoIterator<Item = S>) -> Self {
        {
            let mut queue = self.transcripts.lock();
            queue.extend(transcripts.into_iter().map(Into::into));
        }
        self
    }

    /// Queue one more transcript
    pub fn push_transcript(&self, text: impl Into<String>) {
        self.transcripts.lock().push_back(text.into());
    }
}

#[async_trait]
impl SttProvider for MockStt {
    async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
        Ok(self.transcripts.lock().pop_front().unwrap_or_default())
    }
}

/// Scripted language model
///
/// Streams queued replies split into fixed-size character fragments, with an
/// optional delay between fragments to exercise streaming paths.
pub struct MockLlm {
    replies: Mutex<VecDeque<String>>,
    fragment_chars: usize,
    fragment_delay: Duration,
    model: String,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fragment_chars: 4,
            fragment_delay: Duration::ZERO,
            model: "mock".to_string(),
        }
    }
}

impl MockLlm {
    /// Create a mock with no scripted replies (replies are empty)
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies to be streamed by successive calls
    pub fn with_replies<S: Into<String>>(self, replies: impl IntoIterator<Item = S>) -> Self {
        {
            let mut queue = self.replies.lock();
            queue.extend(replies.into_iter().map(Into::into));
        }
        self
    }

    /// Set the fragment size in characters
    pub fn with_fragment_chars(mut self, chars: usize) -> Self {
        self.fragment_chars = chars.max(1);
        self
    }

    /// Set a delay between fragments
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// Model last set via `set_model`
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<TextStream> {
        let reply = self.replies.lock().pop_front().unwrap_or_default();
        let fragment_chars = self.fragment_chars;
        let delay = self.fragment_delay;

        let fragments: Vec<String> = reply
            .chars()
            .collect::<Vec<_>>()
            .chunks(fragment_chars)
            .map(|chunk| chunk.iter().collect())
            .collect();

        let stream = async_stream::try_stream! {
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield fragment;
            }
        };
        Ok(Box::pin(stream))
    }

    fn set_model(&mut self, model: String) {
        self.model = model;
    }
}

/// Scripted text-to-speech
///
/// Produces a deterministic amount of audio per character. Latency and
/// failure are scriptable per exact text, which is how reordering and
/// placeholder paths are exercised.
pub struct MockTts {
    samples_per_char: usize,
    default_latency: Duration,
    latencies: Mutex<HashMap<String, Duration>>,
    failures: Mutex<Vec<String>>,
}

impl Default for MockTts {
    fn default() -> Self {
        Self {
            samples_per_char: 160,
            default_latency: Duration::ZERO,
            latencies: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }
}

impl MockTts {
    /// Create a mock with instant synthesis
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base latency applied to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    /// Set the amount of audio produced per character
    pub fn with_samples_per_char(mut self, samples: usize) -> Self {
        self.samples_per_char = samples.max(1);
        self
    }

    /// Override the latency for one exact text
    pub fn with_latency_for(self, text: impl Into<String>, latency: Duration) -> Self {
        self.latencies.lock().insert(text.into(), latency);
        self
    }

    /// Fail synthesis for any text containing the given marker
    pub fn failing_on(self, marker: impl Into<String>) -> Self {
        self.failures.lock().push(marker.into());
        self
    }
}

#[async_trait]
impl TtsProvider for MockTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
        let latency = self
            .latencies
            .lock()
            .get(text)
            .copied()
            .unwrap_or(self.default_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failures.lock().iter().any(|m| text.contains(m)) {
            return Err(ParleyError::Tts(format!("scripted failure for: {}", text)));
        }

        let len = text.chars().count() * self.samples_per_char;
        let samples = (0..len)
            .map(|i| ((i as f32) * 0.05).sin() * 0.3)
            .collect();
        Ok(TtsAudio {
            samples,
            sample_rate: BOUNDARY_SAMPLE_RATE,
        })
    }
}

/// Scripted voice-activity detection
///
/// Emits events at configured cumulative frame indices, letting tests drive
/// barge-in at an exact point in the audio stream.
#[derive(Default)]
pub struct MockVad {
    script: Mutex<VecDeque<(u64, VadEvent)>>,
    frames_seen: u64,
}

impl MockVad {
    /// Create a mock that never fires
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event to fire once the given number of frames has been
    /// processed
    pub fn with_event_at(self, frame_index: u64, event: VadEvent) -> Self {
        self.script.lock().push_back((frame_index, event));
        self
    }
}

impl VadProvider for MockVad {
    fn process_frame(&mut self, _frame: &[f32]) -> Result<Vec<VadEvent>> {
        self.frames_seen += 1;
        let mut events = Vec::new();
        let mut script = self.script.lock();
        while let Some(&(at, event)) = script.front() {
            if self.frames_seen >= at {
                events.push(event);
                script.pop_front();
            } else {
                break;
            }
        }
        Ok(events)
    }

    fn reset(&mut self) {
        self.frames_seen = 0;
    }
}
