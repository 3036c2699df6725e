//! Look-ahead synthesis stage
//!
//! A bounded pool of worker threads turns [`SpeakableUnit`]s into
//! [`AudioUnit`]s, overlapping synthesis of future units with playback of
//! earlier ones. Units are admitted through a rendezvous channel, so at most
//! `lookahead` syntheses are ever in flight; completion order is arbitrary
//! and the [`ReorderBuffer`] restores sequence order downstream.
//!
//! A failed or timed-out synthesis never stalls the pipeline: the worker
//! inserts a silent placeholder for that sequence so ordering bookkeeping
//! stays consistent, and reports the failure as an event.

pub mod reorder;

pub use reorder::{NextUnit, ReorderBuffer};

use crate::config::BOUNDARY_SAMPLE_RATE;
use crate::providers::TtsProvider;
use crate::reply::SpeakableUnit;
use crate::turn::CancelToken;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A timed expression change within one unit's audio
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpressionEvent {
    /// Expression keyword
    pub tag: String,

    /// Offset from the start of the unit's samples
    pub offset_samples: usize,
}

/// Synthesized audio for one speakable unit
#[derive(Clone, Debug)]
pub struct AudioUnit {
    /// Sequence of the unit this audio was synthesized from
    pub sequence: u64,

    /// Display text of the unit
    pub text: String,

    /// Mono samples at [`BOUNDARY_SAMPLE_RATE`]
    pub samples: Vec<f32>,

    /// Sample rate of `samples`
    pub sample_rate: u32,

    /// Expression changes, ordered by offset
    pub expression_events: Vec<ExpressionEvent>,

    /// True when synthesis failed and this is a silent placeholder
    pub failed: bool,
}

impl AudioUnit {
    /// Silent placeholder for a unit whose synthesis failed
    pub fn failed(sequence: u64, text: String) -> Self {
        Self {
            sequence,
            text,
            samples: Vec::new(),
            sample_rate: BOUNDARY_SAMPLE_RATE,
            expression_events: Vec::new(),
            failed: true,
        }
    }

    /// Duration of this unit's audio in seconds
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Duration of this unit's audio in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Per-unit completion report sent to the turn controller
#[derive(Clone, Debug)]
pub struct SynthNotice {
    /// Turn the unit belongs to
    pub turn_id: Uuid,

    /// Unit sequence
    pub sequence: u64,

    /// True when the unit was released as a placeholder
    pub failed: bool,

    /// Failure detail, when `failed`
    pub reason: Option<String>,
}

/// Handle to one turn's synthesis worker pool
///
/// Dropping the stage (or calling [`close`](Self::close)) stops admission;
/// workers drain what they already accepted and exit.
pub struct SynthStage {
    job_tx: Option<Sender<SpeakableUnit>>,
    workers: Vec<JoinHandle<()>>,
}

impl SynthStage {
    /// Spawn `lookahead` synthesis workers for one turn
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        provider: Arc<dyn TtsProvider>,
        buffer: Arc<ReorderBuffer>,
        cancel: CancelToken,
        notice_tx: Sender<SynthNotice>,
        turn_id: Uuid,
        lookahead: usize,
        timeout: Duration,
    ) -> Self {
        // rendezvous admission: a submit succeeds only when a worker is
        // free, which is what bounds the number of units in flight
        let (job_tx, job_rx) = bounded::<SpeakableUnit>(0);

        let mut workers = Vec::with_capacity(lookahead.max(1));
        for _ in 0..lookahead.max(1) {
            let provider = Arc::clone(&provider);
            let buffer = Arc::clone(&buffer);
            let cancel = cancel.clone();
            let notice_tx = notice_tx.clone();
            let job_rx = job_rx.clone();

            workers.push(thread::spawn(move || {
                worker_loop(provider, buffer, cancel, notice_tx, turn_id, job_rx, timeout);
            }));
        }

        Self {
            job_tx: Some(job_tx),
            workers,
        }
    }

    /// Try to admit a unit for synthesis
    ///
    /// Fails without blocking when every worker is busy (backpressure: the
    /// caller keeps the unit and retries) or when the stage is closed.
    pub fn try_submit(&self, unit: SpeakableUnit) -> std::result::Result<(), SpeakableUnit> {
        let Some(tx) = &self.job_tx else {
            return Err(unit);
        };
        match tx.try_send(unit) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(unit)) | Err(TrySendError::Disconnected(unit)) => Err(unit),
        }
    }

    /// Stop admitting units; workers finish what they have and exit
    pub fn close(&mut self) {
        self.job_tx = None;
    }

    /// Wait for all workers to exit (used by tests)
    pub fn join(mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    provider: Arc<dyn TtsProvider>,
    buffer: Arc<ReorderBuffer>,
    cancel: CancelToken,
    notice_tx: Sender<SynthNotice>,
    turn_id: Uuid,
    job_rx: crossbeam_channel::Receiver<SpeakableUnit>,
    timeout: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create synthesis runtime: {}", e);
            return;
        }
    };

    while let Ok(unit) = job_rx.recv() {
        if cancel.is_cancelled() {
            break;
        }

        let sequence = unit.sequence;
        debug!(
            "Synthesizing unit {}: {}",
            sequence,
            unit.text.chars().take(60).collect::<String>()
        );

        let result = runtime.block_on(async {
            tokio::time::timeout(timeout, provider.synthesize(&unit.text)).await
        });

        let (audio_unit, reason) = match result {
            Ok(Ok(audio)) => (finish_unit(&unit, audio.samples, audio.sample_rate), None),
            Ok(Err(e)) => {
                warn!("Synthesis failed for unit {}: {}", sequence, e);
                (
                    AudioUnit::failed(sequence, unit.text.clone()),
                    Some(e.to_string()),
                )
            }
            Err(_) => {
                warn!(
                    "Synthesis timed out for unit {} after {:?}",
                    sequence, timeout
                );
                (
                    AudioUnit::failed(sequence, unit.text.clone()),
                    Some(format!("synthesis timed out after {} ms", timeout.as_millis())),
                )
            }
        };

        if cancel.is_cancelled() {
            // late completion racing the cancellation: discard, no event
            debug!("Discarding unit {} synthesized after cancel", sequence);
            break;
        }

        let failed = audio_unit.failed;
        if buffer.insert(audio_unit) {
            let _ = notice_tx.send(SynthNotice {
                turn_id,
                sequence,
                failed,
                reason,
            });
        }
    }

    debug!("Synthesis worker exiting");
}

/// Attach expression timing to synthesized samples
///
/// Text positions map proportionally onto the audio timeline, which is how
/// a cue recorded at the start of a sentence lands at the start of that
/// sentence's audio.
fn finish_unit(unit: &SpeakableUnit, samples: Vec<f32>, sample_rate: u32) -> AudioUnit {
    let text_chars = unit.text.chars().count().max(1);
    let expression_events = unit
        .expressions
        .iter()
        .map(|cue| ExpressionEvent {
            tag: cue.tag.clone(),
            offset_samples: cue.position.min(text_chars) * samples.len() / text_chars,
        })
        .collect();

    AudioUnit {
        sequence: unit.sequence,
        text: unit.text.clone(),
        samples,
        sample_rate,
        expression_events,
        failed: false,
    }
}
