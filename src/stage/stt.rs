//! Speech-to-text stage worker

use crate::providers::SttProvider;
use crate::{ParleyError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands accepted by the STT worker
enum SttCommand {
    /// Transcribe one finalized utterance
    Transcribe(Vec<f32>),
    /// Shut the worker down
    Shutdown,
}

/// Events emitted by the STT worker
#[derive(Clone, Debug)]
pub enum SttEvent {
    /// Final transcript of an utterance
    Transcript(String),
    /// Transcription failed
    Error(String),
}

/// Handle to the STT worker thread
pub struct SttStage {
    command_tx: Sender<SttCommand>,
    event_rx: Receiver<SttEvent>,
    worker: Option<JoinHandle<()>>,
}

impl SttStage {
    /// Spawn the worker around a shared provider
    pub fn spawn(provider: Arc<dyn SttProvider>) -> Result<Self> {
        let (command_tx, command_rx) = bounded::<SttCommand>(16);
        let (event_tx, event_rx) = bounded::<SttEvent>(16);

        let worker = std::thread::Builder::new()
            .name("stt".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create STT runtime: {}", e);
                        return;
                    }
                };

                info!("STT worker ready");
                while let Ok(command) = command_rx.recv() {
                    match command {
                        SttCommand::Transcribe(samples) => {
                            debug!(
                                "Transcribing utterance of {:.2}s",
                                samples.len() as f32 / 16_000.0
                            );
                            match runtime.block_on(provider.transcribe(&samples)) {
                                Ok(text) if text.is_empty() => {
                                    debug!("Empty transcription, nothing to forward");
                                }
                                Ok(text) => {
                                    let _ = event_tx.send(SttEvent::Transcript(text));
                                }
                                Err(e) => {
                                    warn!("Transcription failed: {}", e);
                                    let _ = event_tx.send(SttEvent::Error(e.to_string()));
                                }
                            }
                        }
                        SttCommand::Shutdown => break,
                    }
                }
                info!("STT worker stopped");
            })
            .map_err(|e| ParleyError::Channel(format!("Failed to spawn STT worker: {}", e)))?;

        Ok(Self {
            command_tx,
            event_rx,
            worker: Some(worker),
        })
    }

    /// Submit an utterance for transcription
    pub fn transcribe(&self, samples: Vec<f32>) -> Result<()> {
        self.command_tx
            .send(SttCommand::Transcribe(samples))
            .map_err(|e| ParleyError::Channel(format!("Failed to send to STT worker: {}", e)))
    }

    /// Receiver for worker events
    pub fn events(&self) -> &Receiver<SttEvent> {
        &self.event_rx
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(SttCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
