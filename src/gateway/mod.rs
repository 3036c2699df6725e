//! WebSocket session gateway
//!
//! The boundary between one remote client and one turn controller. Each
//! connection at `/client-ws` gets its own controller thread and provider
//! set; the socket task translates wire messages into session commands and
//! pipeline events into wire messages, preserving order in both directions.
//! A dropped connection counts as an interruption: the session is torn down
//! and the active turn cancelled.

pub mod message;

pub use message::{ClientMessage, ServerMessage};

use crate::config::{AppConfig, BOUNDARY_SAMPLE_RATE};
use crate::providers::{self, SttProvider, TtsProvider};
use crate::turn::{spawn_session, SessionCommand, SessionEvent, SessionProviders};
use crate::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use crossbeam_channel::{bounded, Sender, TrySendError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engines shared by every session
pub struct GatewayState {
    config: AppConfig,
    stt: Arc<dyn SttProvider>,
    tts: Arc<dyn TtsProvider>,
}

impl GatewayState {
    /// Build the shared engines from config
    pub fn new(config: AppConfig) -> Result<Self> {
        let stt = providers::build_stt(&config.stt)?;
        let tts = providers::build_tts(&config.tts)?;
        Ok(Self { config, stt, tts })
    }
}

/// Build the gateway router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/client-ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Load providers, bind, and serve until the process exits
pub async fn serve(config: AppConfig) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(GatewayState::new(config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::ParleyError::Io(format!("Failed to bind {}: {}", addr, e)))?;
    info!("Listening on ws://{}/client-ws", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::ParleyError::Io(format!("Server error: {}", e)))
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    info!("Client connected");

    let session_providers = match build_session_providers(&state) {
        Ok(providers) => providers,
        Err(e) => {
            warn!("Session setup failed: {}", e);
            let (mut sender, _) = socket.split();
            let message = ServerMessage::Error {
                sequence: None,
                reason: e.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&message) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            return;
        }
    };

    let capacity = state.config.pipeline.channel_capacity;
    let (command_tx, command_rx) = bounded::<SessionCommand>(capacity);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();

    let controller = match spawn_session(
        state.config.clone(),
        session_providers,
        command_rx,
        event_tx,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Failed to start session: {}", e);
            return;
        }
    };

    let slice_ms = state.config.pipeline.volume_slice_ms;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(text.as_str(), &command_tx, &mut sender).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            outbound = event_rx.recv() => {
                match outbound {
                    Some(event) => {
                        if forward_event(event, slice_ms, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // connection loss while a turn is active is an implicit interruption
    let _ = command_tx.send(SessionCommand::Disconnect);
    let _ = tokio::task::spawn_blocking(move || {
        let _ = controller.join();
    })
    .await;
    info!("Client session closed");
}

fn build_session_providers(state: &Arc<GatewayState>) -> Result<SessionProviders> {
    Ok(SessionProviders {
        stt: Arc::clone(&state.stt),
        tts: Arc::clone(&state.tts),
        llm: providers::build_llm(&state.config.llm)?,
        vad: providers::build_vad(&state.config.vad)?,
    })
}

async fn handle_client_text(
    text: &str,
    command_tx: &Sender<SessionCommand>,
    sender: &mut (impl SinkExt<Message> + Unpin),
) {
    let command = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::AudioChunk { samples }) => SessionCommand::AudioFrame(samples),
        Ok(ClientMessage::TextInput { text }) => SessionCommand::TextInput(text),
        Ok(ClientMessage::Interrupt) => SessionCommand::Interrupt,
        Ok(ClientMessage::SetModel { model }) => SessionCommand::SetModel(model),
        Ok(ClientMessage::ClearHistory) => SessionCommand::ClearHistory,
        Ok(ClientMessage::Unknown) => {
            debug!("Ignoring unknown message type");
            return;
        }
        Err(e) => {
            // reject the message, keep the connection
            let reply = ServerMessage::Error {
                sequence: None,
                reason: format!("malformed message: {}", e),
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            return;
        }
    };

    match command_tx.try_send(command) {
        Ok(()) => {}
        Err(TrySendError::Full(SessionCommand::AudioFrame(_))) => {
            // audio is real-time; shedding a frame under pressure beats
            // stalling the socket task
            warn!("Session busy, dropping an audio frame");
        }
        Err(e) => {
            warn!("Failed to forward command: {}", e);
        }
    }
}

async fn forward_event(
    event: SessionEvent,
    slice_ms: u64,
    sender: &mut (impl SinkExt<Message> + Unpin),
) -> std::result::Result<(), ()> {
    let message = match ServerMessage::from_event(event, BOUNDARY_SAMPLE_RATE, slice_ms) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            return Ok(());
        }
    };
    let json = match serde_json::to_string(&message) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
