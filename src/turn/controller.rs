//! Per-session turn controller
//!
//! One event-loop thread owns the whole conversational lifecycle: it feeds
//! microphone audio to VAD, finalizes utterances into the STT stage, drives
//! the language model stream through the segmenter, admits speakable units
//! into the synthesis stage under backpressure, and reacts to playback
//! progress. Because the loop is the only place turns are created and
//! destroyed, at most one turn is ever active and turn creation is
//! serialized by construction.
//!
//! Barge-in takes priority over everything else: a speech-started event (or
//! an explicit interrupt) while a reply is in flight cancels the active
//! turn, repairs the conversation history to what the user actually heard,
//! and folds straight back into listening.

use crate::config::{AppConfig, BOUNDARY_SAMPLE_RATE};
use crate::history::ConversationHistory;
use crate::playback::{PlaybackNotice, PlaybackSequencer};
use crate::providers::{LlmProvider, SttProvider, TtsProvider, VadEvent, VadProvider};
use crate::reply::{SpeakableUnit, UtteranceSegmenter};
use crate::stage::{LlmEvent, LlmStage, SttEvent, SttStage};
use crate::synth::{ReorderBuffer, SynthNotice, SynthStage};
use crate::turn::{ControlSignal, SessionCommand, SessionEvent, Turn, TurnState};
use crate::Result;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Longest utterance kept before transcription is forced
const MAX_UTTERANCE_SAMPLES: usize = BOUNDARY_SAMPLE_RATE as usize * 30;

/// Audio kept ahead of a detected speech onset
const PREROLL_SAMPLES: usize = BOUNDARY_SAMPLE_RATE as usize / 2;

/// The provider set one session runs on
pub struct SessionProviders {
    /// Shared speech-to-text engine
    pub stt: Arc<dyn SttProvider>,
    /// Shared text-to-speech engine
    pub tts: Arc<dyn TtsProvider>,
    /// Session-owned language model client
    pub llm: Box<dyn LlmProvider>,
    /// Session-owned voice-activity detector
    pub vad: Box<dyn VadProvider>,
}

/// Spawn the controller thread for one session
///
/// Commands arrive on `command_rx`; everything the client should see leaves
/// through `event_tx`. The thread exits on [`SessionCommand::Disconnect`] or
/// when the command channel closes.
pub fn spawn_session(
    config: AppConfig,
    providers: SessionProviders,
    command_rx: Receiver<SessionCommand>,
    event_tx: UnboundedSender<SessionEvent>,
) -> Result<JoinHandle<()>> {
    let stt_stage = SttStage::spawn(providers.stt)?;
    let llm_stage = LlmStage::spawn(providers.llm)?;

    let (synth_notice_tx, synth_notice_rx) = unbounded();
    let (playback_notice_tx, playback_notice_rx) = unbounded();

    let handle = std::thread::Builder::new()
        .name("turn-controller".to_string())
        .spawn(move || {
            let history = ConversationHistory::new(config.llm.system_prompt.clone());
            let mut controller = Controller {
                config,
                state: TurnState::Idle,
                event_tx,
                history,
                vad: providers.vad,
                tts: providers.tts,
                stt_stage: Some(stt_stage),
                llm_stage: Some(llm_stage),
                synth_notice_tx,
                playback_notice_tx,
                active: None,
                utterance: Vec::with_capacity(PREROLL_SAMPLES * 2),
                speech_active: false,
            };
            controller.run(command_rx, synth_notice_rx, playback_notice_rx);
        })
        .map_err(|e| crate::ParleyError::Channel(format!("Failed to spawn controller: {}", e)))?;

    Ok(handle)
}

/// Everything belonging to the one active turn
struct ActiveTurn {
    turn: Turn,
    buffer: Arc<ReorderBuffer>,
    synth: SynthStage,
    segmenter: UtteranceSegmenter,

    /// Units waiting for a free synthesis slot
    pending: VecDeque<SpeakableUnit>,

    /// Units admitted to the synthesis stage
    submitted: u64,

    /// Units that came back as placeholders
    failed_units: u64,

    /// The model finished streaming
    reply_complete: bool,

    /// The reorder buffer has been told the final unit count
    finish_signalled: bool,

    /// Spoken text per sequence, for history repair on interruption
    unit_texts: Vec<String>,

    /// Highest sequence fully released to the client
    released_through: Option<u64>,

    /// Complete reply text as streamed
    full_reply: String,
}

struct Controller {
    config: AppConfig,
    state: TurnState,
    event_tx: UnboundedSender<SessionEvent>,
    history: ConversationHistory,
    vad: Box<dyn VadProvider>,
    tts: Arc<dyn TtsProvider>,
    stt_stage: Option<SttStage>,
    llm_stage: Option<LlmStage>,
    synth_notice_tx: Sender<SynthNotice>,
    playback_notice_tx: Sender<PlaybackNotice>,
    active: Option<ActiveTurn>,
    utterance: Vec<f32>,
    speech_active: bool,
}

impl Controller {
    fn run(
        &mut self,
        command_rx: Receiver<SessionCommand>,
        synth_notice_rx: Receiver<SynthNotice>,
        playback_notice_rx: Receiver<PlaybackNotice>,
    ) {
        let (stt_events, llm_events) = match (&self.stt_stage, &self.llm_stage) {
            (Some(stt), Some(llm)) => (stt.events().clone(), llm.events().clone()),
            _ => return,
        };

        info!("Session controller started");
        self.set_state(TurnState::Listening);
        self.emit(SessionEvent::Control(ControlSignal::Ready));

        loop {
            select! {
                recv(command_rx) -> command => {
                    let done = match command {
                        Ok(command) => self.handle_command(command),
                        Err(_) => true,
                    };
                    if done {
                        break;
                    }
                }
                recv(stt_events) -> event => {
                    if let Ok(event) = event {
                        self.on_stt_event(event);
                    }
                }
                recv(llm_events) -> event => {
                    if let Ok(event) = event {
                        self.on_llm_event(event);
                    }
                }
                recv(synth_notice_rx) -> notice => {
                    if let Ok(notice) = notice {
                        self.on_synth_notice(notice);
                    }
                }
                recv(playback_notice_rx) -> notice => {
                    if let Ok(notice) = notice {
                        self.on_playback_notice(notice);
                    }
                }
                default(Duration::from_millis(10)) => {}
            }

            self.pump_admissions();
        }

        self.interrupt("session closing");
        if let Some(stage) = self.stt_stage.take() {
            stage.shutdown();
        }
        if let Some(stage) = self.llm_stage.take() {
            stage.shutdown();
        }
        self.state = TurnState::Idle;
        info!("Session controller stopped");
    }

    /// Returns true when the session should shut down
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::AudioFrame(samples) => {
                self.on_audio(samples);
                false
            }
            SessionCommand::TextInput(text) => {
                self.on_text_input(text);
                false
            }
            SessionCommand::Interrupt => {
                self.interrupt("client interrupt");
                false
            }
            SessionCommand::SetModel(model) => {
                info!("Switching model to {}", model);
                if let Some(stage) = &self.llm_stage {
                    if let Err(e) = stage.set_model(model) {
                        warn!("Model switch failed: {}", e);
                    }
                }
                false
            }
            SessionCommand::ClearHistory => {
                self.history.clear();
                false
            }
            SessionCommand::Disconnect => {
                debug!("Disconnect received");
                true
            }
        }
    }

    fn on_audio(&mut self, samples: Vec<f32>) {
        let events = match self.vad.process_frame(&samples) {
            Ok(events) => events,
            Err(e) => {
                warn!("VAD failure: {}", e);
                Vec::new()
            }
        };

        // the microphone is always live; keep a short pre-roll outside an
        // utterance so the onset is not clipped from the transcript
        self.utterance.extend_from_slice(&samples);
        if !self.speech_active && self.utterance.len() > PREROLL_SAMPLES * 2 {
            let excess = self.utterance.len() - PREROLL_SAMPLES;
            self.utterance.drain(..excess);
        }

        for event in events {
            match event {
                VadEvent::SpeechStarted => {
                    if self.state.is_replying() {
                        self.interrupt("barge-in");
                    }
                    self.speech_active = true;
                    debug!("Utterance capture started");
                }
                VadEvent::SpeechEnded => {
                    if self.speech_active {
                        self.finalize_utterance();
                    }
                }
            }
        }

        if self.speech_active && self.utterance.len() > MAX_UTTERANCE_SAMPLES {
            warn!("Utterance hit the length cap; forcing transcription");
            self.finalize_utterance();
        }
    }

    fn finalize_utterance(&mut self) {
        let samples = std::mem::take(&mut self.utterance);
        self.speech_active = false;

        if !self.state.is_listening() || self.active.is_some() {
            debug!("Dropping utterance finalized outside listening");
            return;
        }
        if let Some(stage) = &self.stt_stage {
            if let Err(e) = stage.transcribe(samples) {
                warn!("Failed to hand utterance to STT: {}", e);
            }
        }
    }

    fn on_text_input(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        if self.state.is_replying() {
            self.interrupt("text input during reply");
        }
        self.start_turn(&text);
    }

    fn on_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Transcript(text) => {
                if !self.state.is_listening() || self.active.is_some() {
                    debug!("Ignoring transcript outside listening: {}", text);
                    return;
                }
                self.emit(SessionEvent::Transcript(text.clone()));
                self.start_turn(&text);
            }
            SttEvent::Error(reason) => {
                self.emit(SessionEvent::Error {
                    sequence: None,
                    reason,
                });
            }
        }
    }

    fn start_turn(&mut self, user_text: &str) {
        if self.active.is_some() {
            // creating a second live turn would let two replies interleave
            error!("Refusing to start a turn while one is active");
            return;
        }

        self.history.add_user(user_text);

        let turn = Turn::new();
        info!("Turn {} starting for: {}", turn.turn_id, user_text);

        let buffer = Arc::new(ReorderBuffer::new());
        let synth = SynthStage::spawn(
            Arc::clone(&self.tts),
            Arc::clone(&buffer),
            turn.cancel.clone(),
            self.synth_notice_tx.clone(),
            turn.turn_id,
            self.config.pipeline.lookahead,
            Duration::from_millis(self.config.pipeline.synthesis_timeout_ms),
        );

        let max_chunk_samples = (BOUNDARY_SAMPLE_RATE as u64 * self.config.pipeline.max_chunk_ms
            / 1000) as usize;
        PlaybackSequencer::spawn(
            Arc::clone(&buffer),
            turn.cancel.clone(),
            self.event_tx.clone(),
            self.playback_notice_tx.clone(),
            turn.turn_id,
            max_chunk_samples,
        );

        if let Some(stage) = &self.llm_stage {
            if let Err(e) =
                stage.generate(turn.turn_id, self.history.messages(), turn.cancel.clone())
            {
                error!("Failed to start generation: {}", e);
                self.emit(SessionEvent::Error {
                    sequence: None,
                    reason: e.to_string(),
                });
                buffer.cancel();
                return;
            }
        }

        self.active = Some(ActiveTurn {
            turn,
            buffer,
            synth,
            segmenter: UtteranceSegmenter::new(self.config.segmenter.clone()),
            pending: VecDeque::new(),
            submitted: 0,
            failed_units: 0,
            reply_complete: false,
            finish_signalled: false,
            unit_texts: Vec::new(),
            released_through: None,
            full_reply: String::new(),
        });

        self.set_state(TurnState::Thinking);
        self.emit(SessionEvent::Control(ControlSignal::TurnStart));
    }

    fn on_llm_event(&mut self, event: LlmEvent) {
        match event {
            LlmEvent::Fragment { turn_id, text } => {
                let Some(turn) = &mut self.active else { return };
                if turn.turn.turn_id != turn_id {
                    // late fragment from a cancelled turn
                    return;
                }
                turn.full_reply.push_str(&text);
                let units = turn.segmenter.feed(&text);
                self.enqueue_units(units);
            }
            LlmEvent::Complete { turn_id } => {
                let Some(turn) = &mut self.active else { return };
                if turn.turn.turn_id != turn_id {
                    return;
                }
                turn.reply_complete = true;
                let tail = turn.segmenter.finish();
                if let Some(unit) = tail {
                    self.enqueue_units(vec![unit]);
                }
                debug!("Reply stream complete");
            }
            LlmEvent::Error { turn_id, reason } => {
                let Some(turn) = &self.active else { return };
                if turn.turn.turn_id != turn_id {
                    return;
                }
                warn!("Turn {} failed in generation: {}", turn_id, reason);
                self.emit(SessionEvent::Error {
                    sequence: None,
                    reason,
                });
                self.teardown_active();
                self.emit(SessionEvent::Control(ControlSignal::TurnEnd));
                self.set_state(TurnState::Listening);
            }
        }
    }

    fn enqueue_units(&mut self, units: Vec<SpeakableUnit>) {
        if units.is_empty() {
            return;
        }
        let Some(turn) = &mut self.active else { return };
        for unit in units {
            turn.unit_texts.push(unit.text.clone());
            turn.pending.push_back(unit);
        }
        if self.state == TurnState::Thinking {
            self.set_state(TurnState::Speaking);
        }
    }

    /// Admit pending units while synthesis slots are free, and signal the
    /// end of the stage once the whole reply has been admitted
    fn pump_admissions(&mut self) {
        let Some(turn) = &mut self.active else { return };

        while let Some(unit) = turn.pending.pop_front() {
            match turn.synth.try_submit(unit) {
                Ok(()) => turn.submitted += 1,
                Err(unit) => {
                    // every slot is busy: keep the unit and retry later
                    // rather than dropping it
                    turn.pending.push_front(unit);
                    break;
                }
            }
        }

        if turn.reply_complete && turn.pending.is_empty() && !turn.finish_signalled {
            turn.finish_signalled = true;
            turn.buffer.finish(turn.submitted);
            turn.synth.close();
            debug!("Reply fully admitted: {} units", turn.submitted);
        }
    }

    fn on_synth_notice(&mut self, notice: SynthNotice) {
        let Some(turn) = &mut self.active else { return };
        if turn.turn.turn_id != notice.turn_id {
            return;
        }
        if notice.failed {
            turn.failed_units += 1;
            self.emit(SessionEvent::Error {
                sequence: Some(notice.sequence),
                reason: notice
                    .reason
                    .unwrap_or_else(|| "synthesis failed".to_string()),
            });
        }
    }

    fn on_playback_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Released { turn_id, sequence } => {
                if let Some(turn) = &mut self.active {
                    if turn.turn.turn_id == turn_id {
                        turn.released_through = Some(sequence);
                    }
                }
            }
            PlaybackNotice::Complete {
                turn_id,
                last_sequence,
            } => {
                let Some(turn) = &self.active else { return };
                if turn.turn.turn_id != turn_id {
                    return;
                }
                self.complete_turn(last_sequence);
            }
            PlaybackNotice::Stopped { .. } => {
                // teardown already ran when the cancellation was issued
            }
        }
    }

    fn complete_turn(&mut self, last_sequence: Option<u64>) {
        let Some(turn) = self.active.take() else { return };
        info!(
            "Turn {} complete through sequence {:?}",
            turn.turn.turn_id, last_sequence
        );

        if turn.submitted > 0 && turn.failed_units == turn.submitted {
            self.emit(SessionEvent::Error {
                sequence: None,
                reason: "synthesis failed for every unit of the reply".to_string(),
            });
        }
        if !turn.full_reply.trim().is_empty() {
            self.history.add_assistant(&turn.full_reply);
        }

        self.emit(SessionEvent::Control(ControlSignal::TurnEnd));
        self.set_state(TurnState::Listening);
    }

    /// Cancel the active reply, repair history, return to listening
    fn interrupt(&mut self, reason: &str) {
        if !self.state.is_replying() {
            return;
        }
        info!("Interrupting active turn: {}", reason);

        let heard = self.teardown_active();
        self.history.interrupted(&heard);

        self.set_state(TurnState::Interrupted);
        self.emit(SessionEvent::Control(ControlSignal::TurnEnd));
        self.set_state(TurnState::Listening);
    }

    /// Cancel and drop the active turn; returns the text the user heard
    fn teardown_active(&mut self) -> String {
        let Some(turn) = self.active.take() else {
            return String::new();
        };

        turn.turn.cancel.cancel();
        turn.buffer.cancel();
        // dropping `turn.synth` closes admission; workers drain and exit,
        // discarding anything that completes after the token was set

        match turn.released_through {
            Some(last) => turn
                .unit_texts
                .iter()
                .take(last as usize + 1)
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
            None => String::new(),
        }
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        debug!("State {} -> {}", self.state, state);
        self.state = state;
        self.emit(SessionEvent::State(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockLlm, MockStt, MockTts, MockVad};
    use crossbeam_channel::bounded;
    use tokio::sync::mpsc::unbounded_channel;

    fn mock_providers(llm: MockLlm) -> SessionProviders {
        SessionProviders {
            stt: Arc::new(MockStt::new()),
            tts: Arc::new(MockTts::new()),
            llm: Box::new(llm),
            vad: Box::new(MockVad::new()),
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.synthesis_timeout_ms = 2_000;
        config
    }

    #[test]
    fn test_session_reports_ready_and_listens() {
        let (command_tx, command_rx) = bounded(64);
        let (event_tx, mut event_rx) = unbounded_channel();

        let handle = spawn_session(
            test_config(),
            mock_providers(MockLlm::new()),
            command_rx,
            event_tx,
        )
        .unwrap();

        let first = event_rx.blocking_recv().unwrap();
        assert!(matches!(first, SessionEvent::State(TurnState::Listening)));
        let second = event_rx.blocking_recv().unwrap();
        assert!(matches!(
            second,
            SessionEvent::Control(ControlSignal::Ready)
        ));

        command_tx.send(SessionCommand::Disconnect).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_text_input_drives_full_turn() {
        let (command_tx, command_rx) = bounded(64);
        let (event_tx, mut event_rx) = unbounded_channel();

        let llm = MockLlm::new().with_replies(["Hi there. Nice to meet you."]);
        let handle = spawn_session(test_config(), mock_providers(llm), command_rx, event_tx)
            .unwrap();

        command_tx
            .send(SessionCommand::TextInput("hello".to_string()))
            .unwrap();

        // wait for the turn to end, collecting everything
        let mut events = Vec::new();
        loop {
            match event_rx.blocking_recv() {
                Some(event) => {
                    let is_end =
                        matches!(event, SessionEvent::Control(ControlSignal::TurnEnd));
                    events.push(event);
                    if is_end {
                        break;
                    }
                }
                None => panic!("session died early"),
            }
        }

        let states: Vec<TurnState> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                TurnState::Listening,
                TurnState::Thinking,
                TurnState::Speaking
            ]
        );

        let chunk_sequences: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::AudioChunk { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        // two sentences, released in order
        assert!(!chunk_sequences.is_empty());
        let mut sorted = chunk_sequences.clone();
        sorted.sort_unstable();
        assert_eq!(chunk_sequences, sorted);
        assert_eq!(chunk_sequences.last(), Some(&1));

        command_tx.send(SessionCommand::Disconnect).unwrap();
        handle.join().unwrap();
    }
}
