//! Language-model stage worker
//!
//! Streams reply fragments for one turn at a time. Cancellation is
//! cooperative: the worker re-checks the turn's token between fragments (and
//! on a short tick while the stream is quiet), drops the stream when the
//! token is set, and emits nothing further for that turn.

use crate::history::ChatMessage;
use crate::providers::LlmProvider;
use crate::turn::CancelToken;
use crate::{ParleyError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use futures::StreamExt;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long to wait on a quiet stream before re-checking cancellation
const CANCEL_POLL: Duration = Duration::from_millis(250);

/// Commands accepted by the LLM worker
enum LlmCommand {
    Generate {
        turn_id: Uuid,
        messages: Vec<ChatMessage>,
        cancel: CancelToken,
    },
    SetModel(String),
    Shutdown,
}

/// Events emitted by the LLM worker
#[derive(Clone, Debug)]
pub enum LlmEvent {
    /// A reply fragment arrived
    Fragment { turn_id: Uuid, text: String },
    /// The reply finished cleanly
    Complete { turn_id: Uuid },
    /// The provider call failed
    Error { turn_id: Uuid, reason: String },
}

/// Handle to the LLM worker thread
pub struct LlmStage {
    command_tx: Sender<LlmCommand>,
    event_rx: Receiver<LlmEvent>,
    worker: Option<JoinHandle<()>>,
}

impl LlmStage {
    /// Spawn the worker around a session-owned provider
    pub fn spawn(provider: Box<dyn LlmProvider>) -> Result<Self> {
        let (command_tx, command_rx) = bounded::<LlmCommand>(16);
        let (event_tx, event_rx) = bounded::<LlmEvent>(256);

        let worker = std::thread::Builder::new()
            .name("llm".to_string())
            .spawn(move || worker_loop(provider, command_rx, event_tx))
            .map_err(|e| ParleyError::Channel(format!("Failed to spawn LLM worker: {}", e)))?;

        Ok(Self {
            command_tx,
            event_rx,
            worker: Some(worker),
        })
    }

    /// Start streaming a reply for one turn
    pub fn generate(
        &self,
        turn_id: Uuid,
        messages: Vec<ChatMessage>,
        cancel: CancelToken,
    ) -> Result<()> {
        self.command_tx
            .send(LlmCommand::Generate {
                turn_id,
                messages,
                cancel,
            })
            .map_err(|e| ParleyError::Channel(format!("Failed to send to LLM worker: {}", e)))
    }

    /// Switch the model for subsequent replies
    pub fn set_model(&self, model: String) -> Result<()> {
        self.command_tx
            .send(LlmCommand::SetModel(model))
            .map_err(|e| ParleyError::Channel(format!("Failed to send to LLM worker: {}", e)))
    }

    /// Receiver for worker events
    pub fn events(&self) -> &Receiver<LlmEvent> {
        &self.event_rx
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(LlmCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    mut provider: Box<dyn LlmProvider>,
    command_rx: Receiver<LlmCommand>,
    event_tx: Sender<LlmEvent>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create LLM runtime: {}", e);
            return;
        }
    };

    info!("LLM worker ready");
    while let Ok(command) = command_rx.recv() {
        match command {
            LlmCommand::Generate {
                turn_id,
                messages,
                cancel,
            } => {
                debug!("Generating reply for turn {}", turn_id);
                let outcome = runtime.block_on(stream_reply(
                    provider.as_ref(),
                    &messages,
                    turn_id,
                    &cancel,
                    &event_tx,
                ));
                match outcome {
                    Ok(true) => {
                        debug!("Generation for turn {} cancelled", turn_id);
                    }
                    Ok(false) => {
                        let _ = event_tx.send(LlmEvent::Complete { turn_id });
                    }
                    Err(e) => {
                        warn!("Generation for turn {} failed: {}", turn_id, e);
                        let _ = event_tx.send(LlmEvent::Error {
                            turn_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            LlmCommand::SetModel(model) => {
                provider.set_model(model);
            }
            LlmCommand::Shutdown => break,
        }
    }
    info!("LLM worker stopped");
}

/// Drive one reply stream; returns `Ok(true)` when cancelled mid-stream
async fn stream_reply(
    provider: &dyn LlmProvider,
    messages: &[ChatMessage],
    turn_id: Uuid,
    cancel: &CancelToken,
    event_tx: &Sender<LlmEvent>,
) -> Result<bool> {
    let mut stream = provider.generate(messages).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        match tokio::time::timeout(CANCEL_POLL, stream.next()).await {
            Ok(Some(Ok(text))) => {
                let _ = event_tx.send(LlmEvent::Fragment { turn_id, text });
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Ok(false),
            // quiet stream: loop around and re-check the token
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockLlm;

    fn collect_reply(stage: &LlmStage, turn_id: Uuid) -> (String, bool) {
        let mut text = String::new();
        loop {
            match stage.events().recv_timeout(Duration::from_secs(2)) {
                Ok(LlmEvent::Fragment {
                    turn_id: id,
                    text: fragment,
                }) if id == turn_id => text.push_str(&fragment),
                Ok(LlmEvent::Complete { turn_id: id }) if id == turn_id => return (text, true),
                Ok(LlmEvent::Error { .. }) => return (text, false),
                Ok(_) => {}
                Err(_) => return (text, false),
            }
        }
    }

    #[test]
    fn test_streams_fragments_then_completes() {
        let provider = Box::new(
            MockLlm::new()
                .with_replies(["A short reply."])
                .with_fragment_chars(3),
        );
        let stage = LlmStage::spawn(provider).unwrap();

        let turn_id = Uuid::new_v4();
        stage
            .generate(turn_id, vec![ChatMessage::user("hi")], CancelToken::new())
            .unwrap();

        let (text, completed) = collect_reply(&stage, turn_id);
        assert!(completed);
        assert_eq!(text, "A short reply.");

        stage.shutdown();
    }

    #[test]
    fn test_cancel_stops_fragment_flow() {
        let provider = Box::new(
            MockLlm::new()
                .with_replies(["This reply streams slowly and then gets cut off."])
                .with_fragment_chars(2)
                .with_fragment_delay(Duration::from_millis(30)),
        );
        let stage = LlmStage::spawn(provider).unwrap();

        let turn_id = Uuid::new_v4();
        let cancel = CancelToken::new();
        stage
            .generate(turn_id, vec![ChatMessage::user("hi")], cancel.clone())
            .unwrap();

        // let a few fragments through, then cancel
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();

        // drain: no Complete event may follow the cancellation
        let mut saw_complete = false;
        while let Ok(event) = stage.events().recv_timeout(Duration::from_millis(600)) {
            if matches!(event, LlmEvent::Complete { .. }) {
                saw_complete = true;
            }
        }
        assert!(!saw_complete);

        stage.shutdown();
    }

    #[test]
    fn test_set_model_reaches_provider() {
        let provider = Box::new(MockLlm::new());
        let stage = LlmStage::spawn(provider).unwrap();
        stage.set_model("other-model".to_string()).unwrap();
        // the command is applied before any later generate; shutdown drains it
        stage.shutdown();
    }
}
