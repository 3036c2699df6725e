//! Silero voice-activity detection with utterance edge tracking
//!
//! The underlying detector classifies fixed-size chunks; this adapter
//! buffers arbitrary inbound frames into those chunks and turns the
//! per-chunk speech probabilities into `SpeechStarted`/`SpeechEnded` edges.
//! A short minimum-speech requirement suppresses clicks, and speech only
//! ends after the configured hangover of continuous silence, so natural
//! pauses inside an utterance do not end it.

use crate::config::{VadConfig, BOUNDARY_SAMPLE_RATE};
use crate::providers::{VadEvent, VadProvider};
use crate::{ParleyError, Result};
use tracing::{debug, info};
use voice_activity_detector::VoiceActivityDetector as SileroDetector;

/// Samples per detector chunk at 16 kHz (32 ms)
const CHUNK_SAMPLES: usize = 512;

/// Silero-backed VAD provider
pub struct SileroVad {
    detector: SileroDetector,
    threshold: f32,

    /// Inbound samples not yet forming a full chunk
    pending: Vec<f32>,

    /// Currently inside an utterance
    speaking: bool,

    /// Consecutive speech samples while not yet `speaking`
    speech_run: usize,

    /// Consecutive silence samples while `speaking`
    silence_run: usize,

    min_speech_samples: usize,
    hangover_samples: usize,
}

impl SileroVad {
    /// Create a detector from config
    pub fn new(config: &VadConfig) -> Result<Self> {
        let detector = SileroDetector::builder()
            .sample_rate(BOUNDARY_SAMPLE_RATE as i32)
            .chunk_size(CHUNK_SAMPLES)
            .build()
            .map_err(|e| ParleyError::Vad(format!("Failed to create detector: {:?}", e)))?;

        info!(
            "Initialized VAD: threshold {}, hangover {} ms",
            config.threshold, config.hangover_ms
        );

        Ok(Self {
            detector,
            threshold: config.threshold,
            pending: Vec::with_capacity(CHUNK_SAMPLES * 2),
            speaking: false,
            speech_run: 0,
            silence_run: 0,
            min_speech_samples: ms_to_samples(config.min_speech_ms),
            hangover_samples: ms_to_samples(config.hangover_ms),
        })
    }

    fn classify_chunk(&mut self, chunk: &[f32]) -> bool {
        let probability = self.detector.predict(chunk.iter().copied());
        probability >= self.threshold
    }

    fn advance(&mut self, is_speech: bool, events: &mut Vec<VadEvent>) {
        if is_speech {
            self.silence_run = 0;
            if !self.speaking {
                self.speech_run += CHUNK_SAMPLES;
                if self.speech_run >= self.min_speech_samples {
                    self.speaking = true;
                    debug!("Speech started");
                    events.push(VadEvent::SpeechStarted);
                }
            }
        } else if self.speaking {
            self.silence_run += CHUNK_SAMPLES;
            if self.silence_run >= self.hangover_samples {
                self.speaking = false;
                self.speech_run = 0;
                self.silence_run = 0;
                debug!("Speech ended");
                events.push(VadEvent::SpeechEnded);
            }
        } else {
            self.speech_run = 0;
        }
    }
}

fn ms_to_samples(ms: u64) -> usize {
    ((BOUNDARY_SAMPLE_RATE as u64 * ms) / 1000) as usize
}

impl VadProvider for SileroVad {
    fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<VadEvent>> {
        self.pending.extend_from_slice(frame);

        let mut events = Vec::new();
        while self.pending.len() >= CHUNK_SAMPLES {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SAMPLES).collect();
            let is_speech = self.classify_chunk(&chunk);
            self.advance(is_speech, &mut events);
        }
        Ok(events)
    }

    fn reset(&mut self) {
        self.detector.reset();
        self.pending.clear();
        self.speaking = false;
        self.speech_run = 0;
        self.silence_run = 0;
    }
}
