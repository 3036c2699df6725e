//! End-to-end tests of the conversational turn pipeline
//!
//! These run the real controller, segmenter, synthesis stage, and playback
//! sequencer; only the provider engines are mocked.

use parley::providers::mock::{MockLlm, MockStt, MockTts, MockVad};
use parley::providers::VadEvent;
use parley::turn::spawn_session;
use parley::{
    AppConfig, ControlSignal, SessionCommand, SessionEvent, SessionProviders, TurnState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct TestSession {
    command_tx: crossbeam_channel::Sender<SessionCommand>,
    event_rx: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    handle: std::thread::JoinHandle<()>,
}

impl TestSession {
    fn start(config: AppConfig, providers: SessionProviders) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::bounded(256);
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_session(config, providers, command_rx, event_tx).unwrap();
        Self {
            command_tx,
            event_rx,
            handle,
        }
    }

    fn send(&self, command: SessionCommand) {
        self.command_tx.send(command).unwrap();
    }

    /// Collect events until `stop` matches one (inclusive); panics on timeout
    fn collect_until(
        &mut self,
        timeout: Duration,
        stop: impl Fn(&SessionEvent) -> bool,
    ) -> Vec<SessionEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    let done = stop(&event);
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                Err(_) => {
                    if Instant::now() > deadline {
                        panic!("timed out waiting for event; saw: {:?}", events);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    /// Collect whatever arrives within the window
    fn collect_for(&mut self, window: Duration) -> Vec<SessionEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        events
    }

    fn close(self) {
        let _ = self.command_tx.send(SessionCommand::Disconnect);
        let _ = self.handle.join();
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.lookahead = 2;
    config.pipeline.synthesis_timeout_ms = 2_000;
    config
}

fn providers(stt: MockStt, llm: MockLlm, tts: MockTts, vad: MockVad) -> SessionProviders {
    SessionProviders {
        stt: Arc::new(stt),
        tts: Arc::new(tts),
        llm: Box::new(llm),
        vad: Box::new(vad),
    }
}

fn chunk_sequences(events: &[SessionEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AudioChunk { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect()
}

fn states(events: &[SessionEvent]) -> Vec<TurnState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::State(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn is_turn_end(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Control(ControlSignal::TurnEnd))
}

#[test]
fn test_release_order_survives_adversarial_synthesis_latency() {
    // later sentences synthesize much faster than earlier ones
    let tts = MockTts::new()
        .with_latency(Duration::from_millis(10))
        .with_latency_for("Alpha alpha.", Duration::from_millis(250))
        .with_latency_for("Charlie charlie.", Duration::from_millis(120));
    let llm = MockLlm::new().with_replies(["Alpha alpha. Bravo bravo. Charlie charlie. Delta delta."]);

    let mut config = test_config();
    config.pipeline.lookahead = 3;

    let mut session = TestSession::start(
        config,
        providers(MockStt::new(), llm, tts, MockVad::new()),
    );
    session.send(SessionCommand::TextInput("go".to_string()));

    let events = session.collect_until(Duration::from_secs(5), is_turn_end);

    let sequences = chunk_sequences(&events);
    assert_eq!(
        sequences,
        vec![0, 1, 2, 3],
        "release order must be sequential no matter when synthesis finishes"
    );

    // unit texts ride along with the first chunk of each unit, in order
    let texts: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AudioChunk {
                text: Some(text), ..
            } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        texts,
        vec![
            "Alpha alpha.",
            "Bravo bravo.",
            "Charlie charlie.",
            "Delta delta."
        ]
    );

    session.close();
}

#[test]
fn test_failed_unit_releases_as_placeholder_with_error() {
    let tts = MockTts::new().failing_on("Bravo");
    let llm = MockLlm::new().with_replies(["Alpha alpha. Bravo bravo. Charlie charlie."]);

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, tts, MockVad::new()),
    );
    session.send(SessionCommand::TextInput("go".to_string()));

    let events = session.collect_until(Duration::from_secs(5), is_turn_end);

    // the failed unit is skipped as silence; its neighbors still release in order
    assert_eq!(chunk_sequences(&events), vec![0, 2]);

    // and its failure is reported against its sequence
    let unit_errors: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error {
                sequence: Some(sequence),
                ..
            } => Some(*sequence),
            _ => None,
        })
        .collect();
    assert_eq!(unit_errors, vec![1]);

    session.close();
}

#[test]
fn test_voice_roundtrip_through_vad_and_stt() {
    let vad = MockVad::new()
        .with_event_at(2, VadEvent::SpeechStarted)
        .with_event_at(6, VadEvent::SpeechEnded);
    let stt = MockStt::new().with_transcripts(["what time is it"]);
    let llm = MockLlm::new().with_replies(["It is noon."]);

    let mut session = TestSession::start(
        test_config(),
        providers(stt, llm, MockTts::new(), vad),
    );

    for _ in 0..8 {
        session.send(SessionCommand::AudioFrame(vec![0.01; 512]));
    }

    let events = session.collect_until(Duration::from_secs(5), is_turn_end);

    let transcript = events.iter().find_map(|e| match e {
        SessionEvent::Transcript(text) => Some(text.clone()),
        _ => None,
    });
    assert_eq!(transcript.as_deref(), Some("what time is it"));

    assert_eq!(
        states(&events),
        vec![
            TurnState::Listening,
            TurnState::Thinking,
            TurnState::Speaking
        ]
    );
    assert_eq!(chunk_sequences(&events), vec![0]);

    session.close();
}

#[test]
fn test_barge_in_stops_release_and_returns_to_listening() {
    // unit 0 is fast, everything after is slow, so the barge-in lands while
    // units 1 and 2 are still being synthesized
    let tts = MockTts::new()
        .with_latency(Duration::from_millis(400))
        .with_latency_for("One one.", Duration::from_millis(50));
    let llm =
        MockLlm::new().with_replies(["One one. Two two. Three three. Four four. Five five."]);
    let vad = MockVad::new().with_event_at(1, VadEvent::SpeechStarted);

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, tts, vad),
    );
    session.send(SessionCommand::TextInput("go".to_string()));

    // wait until the first audio reaches the client
    let before = session.collect_until(Duration::from_secs(5), |e| {
        matches!(e, SessionEvent::AudioChunk { .. })
    });
    assert_eq!(chunk_sequences(&before), vec![0]);

    // the user starts talking
    session.send(SessionCommand::AudioFrame(vec![0.2; 512]));

    let after = session.collect_until(Duration::from_secs(5), |e| {
        matches!(e, SessionEvent::State(TurnState::Listening))
    });

    // interruption folds through Interrupted straight into Listening
    let after_states = states(&after);
    let interrupted_at = after_states
        .iter()
        .position(|s| *s == TurnState::Interrupted)
        .expect("must pass through Interrupted");
    assert_eq!(after_states.get(interrupted_at + 1), Some(&TurnState::Listening));

    // nothing beyond the already-released prefix ever comes out, even after
    // the slow syntheses finish
    let leftovers = session.collect_for(Duration::from_millis(700));

    // the client is told playback stopped (the sequencer thread races the
    // controller, so the notification may trail the state change)
    assert!(after
        .iter()
        .chain(leftovers.iter())
        .any(|e| matches!(e, SessionEvent::Control(ControlSignal::PlaybackStopped))));
    let late_chunks: Vec<u64> = chunk_sequences(&after)
        .into_iter()
        .chain(chunk_sequences(&leftovers))
        .collect();
    assert!(
        late_chunks.iter().all(|&seq| seq <= 2),
        "units past the look-ahead window must never be released, got {:?}",
        late_chunks
    );

    session.close();
}

#[test]
fn test_interrupt_command_during_thinking() {
    // a reply that streams slowly enough to interrupt mid-generation
    let llm = MockLlm::new()
        .with_replies(["This reply takes a while to stream out completely. More text here."])
        .with_fragment_chars(2)
        .with_fragment_delay(Duration::from_millis(20));
    let tts = MockTts::new().with_latency(Duration::from_millis(100));

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, tts, MockVad::new()),
    );
    session.send(SessionCommand::TextInput("go".to_string()));

    session.collect_until(Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::State(TurnState::Thinking))
    });
    session.send(SessionCommand::Interrupt);

    let events = session.collect_until(Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::State(TurnState::Listening))
    });
    assert!(states(&events).contains(&TurnState::Interrupted));

    // a fresh turn works normally after the interruption
    session.send(SessionCommand::TextInput("again".to_string()));
    let events = session.collect_until(Duration::from_secs(5), is_turn_end);
    assert!(states(&events).contains(&TurnState::Thinking));

    session.close();
}

#[test]
fn test_interrupt_while_listening_is_a_no_op() {
    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), MockLlm::new(), MockTts::new(), MockVad::new()),
    );

    // wait for startup
    session.collect_until(Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Control(ControlSignal::Ready))
    });

    session.send(SessionCommand::Interrupt);
    let events = session.collect_for(Duration::from_millis(200));
    assert!(
        events.is_empty(),
        "no state churn expected, got {:?}",
        events
    );

    session.close();
}

#[test]
fn test_empty_reply_completes_turn_without_speaking() {
    // the model returns nothing speakable
    let llm = MockLlm::new().with_replies([""]);

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, MockTts::new(), MockVad::new()),
    );
    session.send(SessionCommand::TextInput("go".to_string()));

    let events = session.collect_until(Duration::from_secs(5), is_turn_end);
    assert!(chunk_sequences(&events).is_empty());
    // never left Thinking for Speaking
    assert!(!states(&events).contains(&TurnState::Speaking));

    session.close();
}

#[test]
fn test_two_consecutive_turns_renumber_from_zero() {
    let llm = MockLlm::new().with_replies(["First reply. Second part.", "Another reply."]);

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, MockTts::new(), MockVad::new()),
    );

    session.send(SessionCommand::TextInput("one".to_string()));
    let first = session.collect_until(Duration::from_secs(5), is_turn_end);
    assert_eq!(chunk_sequences(&first), vec![0, 1]);

    session.send(SessionCommand::TextInput("two".to_string()));
    let second = session.collect_until(Duration::from_secs(5), is_turn_end);
    assert_eq!(chunk_sequences(&second), vec![0]);

    session.close();
}

#[test]
fn test_expressions_flow_through_to_events() {
    let llm = MockLlm::new().with_replies(["Well hello there. [smile] Good to see you."]);

    let mut session = TestSession::start(
        test_config(),
        providers(MockStt::new(), llm, MockTts::new(), MockVad::new()),
    );
    session.send(SessionCommand::TextInput("hi".to_string()));

    let events = session.collect_until(Duration::from_secs(5), is_turn_end);

    let expressions: Vec<(u64, String)> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Expression { sequence, tag, .. } => Some((*sequence, tag.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(expressions, vec![(1, "smile".to_string())]);

    // the tag is stripped from the spoken text
    let texts: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AudioChunk {
                text: Some(text), ..
            } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["Well hello there.", "Good to see you."]);

    session.close();
}
