//! Ordered playback release
//!
//! The sequencer is the single writer to the session's output: it drains the
//! [`ReorderBuffer`] strictly in sequence order, slices each unit's samples
//! into bounded chunks, and interleaves expression events at their recorded
//! sample offsets so the remote face tracks the audio timeline. Failed
//! placeholder units release as zero-length silence with no expression
//! events, keeping downstream sequencing fed.

use crate::synth::{AudioUnit, NextUnit, ReorderBuffer};
use crate::turn::{CancelToken, ControlSignal, SessionEvent};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

/// Progress reports sent to the turn controller
#[derive(Clone, Debug)]
pub enum PlaybackNotice {
    /// A unit was fully released to the client
    Released { turn_id: Uuid, sequence: u64 },

    /// All units of the turn were released in order
    Complete {
        turn_id: Uuid,
        /// Highest sequence released, `None` for an empty reply
        last_sequence: Option<u64>,
    },

    /// Playback was cut short by cancellation
    Stopped { turn_id: Uuid },
}

/// Playback sequencer for one turn
pub struct PlaybackSequencer;

enum Release {
    Done,
    Aborted,
}

impl PlaybackSequencer {
    /// Spawn the consumer thread for one turn
    pub fn spawn(
        buffer: Arc<ReorderBuffer>,
        cancel: CancelToken,
        event_tx: UnboundedSender<SessionEvent>,
        notice_tx: Sender<PlaybackNotice>,
        turn_id: Uuid,
        max_chunk_samples: usize,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            run(
                buffer,
                cancel,
                event_tx,
                notice_tx,
                turn_id,
                max_chunk_samples.max(1),
            );
        })
    }
}

fn run(
    buffer: Arc<ReorderBuffer>,
    cancel: CancelToken,
    event_tx: UnboundedSender<SessionEvent>,
    notice_tx: Sender<PlaybackNotice>,
    turn_id: Uuid,
    max_chunk_samples: usize,
) {
    let mut last_released: Option<u64> = None;

    loop {
        match buffer.take_next() {
            NextUnit::Unit(unit) => {
                if cancel.is_cancelled() {
                    stop(&event_tx, &notice_tx, turn_id);
                    return;
                }
                match release_unit(&unit, &cancel, &event_tx, max_chunk_samples) {
                    Release::Done => {
                        last_released = Some(unit.sequence);
                        let _ = notice_tx.send(PlaybackNotice::Released {
                            turn_id,
                            sequence: unit.sequence,
                        });
                    }
                    Release::Aborted => {
                        stop(&event_tx, &notice_tx, turn_id);
                        return;
                    }
                }
            }
            NextUnit::Finished => {
                info!("Playback complete through sequence {:?}", last_released);
                let _ = notice_tx.send(PlaybackNotice::Complete {
                    turn_id,
                    last_sequence: last_released,
                });
                return;
            }
            NextUnit::Cancelled => {
                stop(&event_tx, &notice_tx, turn_id);
                return;
            }
        }
    }
}

fn stop(
    event_tx: &UnboundedSender<SessionEvent>,
    notice_tx: &Sender<PlaybackNotice>,
    turn_id: Uuid,
) {
    debug!("Playback stopped for turn {}", turn_id);
    let _ = event_tx.send(SessionEvent::Control(ControlSignal::PlaybackStopped));
    let _ = notice_tx.send(PlaybackNotice::Stopped { turn_id });
}

/// Release one unit's samples and expression events in timeline order
fn release_unit(
    unit: &AudioUnit,
    cancel: &CancelToken,
    event_tx: &UnboundedSender<SessionEvent>,
    max_chunk_samples: usize,
) -> Release {
    if unit.failed {
        // zero-duration silence keeps the client's sequencing fed without
        // starving expression sync
        return Release::Done;
    }

    let total = unit.samples.len();
    let mut cursor = 0usize;
    let mut next_event = 0usize;
    let mut first_chunk = true;

    while cursor < total || next_event < unit.expression_events.len() {
        if cancel.is_cancelled() {
            return Release::Aborted;
        }

        // fire every expression due at or before the cursor; once the audio
        // is exhausted everything left fires regardless of offset
        while let Some(event) = unit.expression_events.get(next_event) {
            if event.offset_samples > cursor && cursor < total {
                break;
            }
            let offset_ms = if unit.sample_rate == 0 {
                0
            } else {
                (event.offset_samples as u64 * 1000) / unit.sample_rate as u64
            };
            let _ = event_tx.send(SessionEvent::Expression {
                sequence: unit.sequence,
                tag: event.tag.clone(),
                offset_ms,
            });
            next_event += 1;
        }

        if cursor >= total {
            continue;
        }

        // stop the chunk at the next expression offset so the event lands
        // exactly between the samples before and after it
        let stop_at = unit
            .expression_events
            .get(next_event)
            .map(|e| e.offset_samples.clamp(cursor + 1, total))
            .unwrap_or(total);
        let end = (cursor + max_chunk_samples).min(stop_at);

        let sent = event_tx.send(SessionEvent::AudioChunk {
            sequence: unit.sequence,
            samples: unit.samples[cursor..end].to_vec(),
            text: first_chunk.then(|| unit.text.clone()),
        });
        if sent.is_err() {
            // the session is gone; nothing left to release to
            return Release::Aborted;
        }
        first_chunk = false;
        cursor = end;
    }

    Release::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::ExpressionEvent;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn audio_unit(sequence: u64, samples: usize) -> AudioUnit {
        AudioUnit {
            sequence,
            text: format!("unit {}", sequence),
            samples: vec![0.25; samples],
            sample_rate: 16_000,
            expression_events: Vec::new(),
            failed: false,
        }
    }

    fn drain_events(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_release_order_is_sequential_for_any_arrival_order() {
        let buffer = Arc::new(ReorderBuffer::new());
        let cancel = CancelToken::new();
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = unbounded();
        let turn_id = Uuid::new_v4();

        let handle = PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            cancel,
            event_tx,
            notice_tx,
            turn_id,
            8_000,
        );

        // arrival permutation 2, 0, 3, 1
        for seq in [2u64, 0, 3, 1] {
            buffer.insert(audio_unit(seq, 320));
        }
        buffer.finish(4);
        handle.join().unwrap();

        let mut released = Vec::new();
        while let Ok(notice) = notice_rx.try_recv() {
            match notice {
                PlaybackNotice::Released { sequence, .. } => released.push(sequence),
                PlaybackNotice::Complete { last_sequence, .. } => {
                    assert_eq!(last_sequence, Some(3));
                }
                PlaybackNotice::Stopped { .. } => panic!("unexpected stop"),
            }
        }
        assert_eq!(released, vec![0, 1, 2, 3]);

        let chunk_sequences: Vec<u64> = drain_events(&mut event_rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::AudioChunk { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_expression_interleaves_at_offset() {
        let buffer = Arc::new(ReorderBuffer::new());
        let cancel = CancelToken::new();
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (notice_tx, _notice_rx) = unbounded();

        let mut unit = audio_unit(0, 1600);
        unit.expression_events = vec![ExpressionEvent {
            tag: "smile".to_string(),
            offset_samples: 800,
        }];
        buffer.insert(unit);
        buffer.finish(1);

        PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            cancel,
            event_tx,
            notice_tx,
            Uuid::new_v4(),
            160_000,
        )
        .join()
        .unwrap();

        let events = drain_events(&mut event_rx);
        // audio before the cue, then the cue, then the rest
        match &events[0] {
            SessionEvent::AudioChunk { samples, text, .. } => {
                assert_eq!(samples.len(), 800);
                assert!(text.is_some());
            }
            other => panic!("expected audio first, got {:?}", other),
        }
        match &events[1] {
            SessionEvent::Expression { tag, offset_ms, .. } => {
                assert_eq!(tag, "smile");
                assert_eq!(*offset_ms, 50);
            }
            other => panic!("expected expression, got {:?}", other),
        }
        match &events[2] {
            SessionEvent::AudioChunk { samples, text, .. } => {
                assert_eq!(samples.len(), 800);
                assert!(text.is_none());
            }
            other => panic!("expected trailing audio, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_expression_fires_before_audio() {
        let buffer = Arc::new(ReorderBuffer::new());
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (notice_tx, _notice_rx) = unbounded();

        let mut unit = audio_unit(0, 320);
        unit.expression_events = vec![ExpressionEvent {
            tag: "laugh".to_string(),
            offset_samples: 0,
        }];
        buffer.insert(unit);
        buffer.finish(1);

        PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            CancelToken::new(),
            event_tx,
            notice_tx,
            Uuid::new_v4(),
            160_000,
        )
        .join()
        .unwrap();

        let events = drain_events(&mut event_rx);
        assert!(matches!(&events[0], SessionEvent::Expression { tag, .. } if tag == "laugh"));
        assert!(matches!(&events[1], SessionEvent::AudioChunk { .. }));
    }

    #[test]
    fn test_failed_unit_releases_as_silence() {
        let buffer = Arc::new(ReorderBuffer::new());
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = unbounded();

        buffer.insert(audio_unit(0, 160));
        buffer.insert(AudioUnit::failed(1, "broken".to_string()));
        buffer.insert(audio_unit(2, 160));
        buffer.finish(3);

        PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            CancelToken::new(),
            event_tx,
            notice_tx,
            Uuid::new_v4(),
            160_000,
        )
        .join()
        .unwrap();

        // all three sequences report released, in order
        let released: Vec<u64> = notice_rx
            .try_iter()
            .filter_map(|n| match n {
                PlaybackNotice::Released { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(released, vec![0, 1, 2]);

        // but no audio is emitted for the placeholder
        let chunk_sequences: Vec<u64> = drain_events(&mut event_rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::AudioChunk { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_sequences, vec![0, 2]);
    }

    #[test]
    fn test_cancel_stops_release_and_reports_once() {
        let buffer = Arc::new(ReorderBuffer::new());
        let cancel = CancelToken::new();
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = unbounded();

        let handle = PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            cancel.clone(),
            event_tx,
            notice_tx,
            Uuid::new_v4(),
            160_000,
        );

        buffer.insert(audio_unit(0, 320));
        std::thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        buffer.cancel();
        handle.join().unwrap();

        let stops = notice_rx
            .try_iter()
            .filter(|n| matches!(n, PlaybackNotice::Stopped { .. }))
            .count();
        assert_eq!(stops, 1);

        let stop_events = drain_events(&mut event_rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::Control(ControlSignal::PlaybackStopped)
                )
            })
            .count();
        assert_eq!(stop_events, 1);
    }
}
