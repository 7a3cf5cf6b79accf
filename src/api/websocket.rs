//! WebSocket handler for real-time voice conversations

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::ApiState;
use crate::config::AudioMode;
use crate::pipeline::{ClientEvent, ClientInput, END_SENTINEL};

/// Optional query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Conversation to continue; a fresh one is created if absent
    session_id: Option<String>,
    /// Audio transport override
    audio: Option<AudioMode>,
}

/// Classified inbound frame
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Input(ClientInput),
    Ignore,
    Close,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voice", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let audio_mode = query.audio.unwrap_or(state.audio_mode);

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, audio_mode))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, session_id: String, audio_mode: AudioMode) {
    let (mut sender, mut receiver) = socket.split();

    // Send connected message
    let connected = ClientEvent::Connected {
        session_id: session_id.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&connected) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    tracing::info!(session_id = %session_id, audio_mode = ?audio_mode, "WebSocket connected");

    let (input_tx, input_rx) = mpsc::channel::<ClientInput>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<ClientEvent>(32);

    // Forward pipeline events to the client in emission order
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Some(msg) = outbound(event, audio_mode) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Feed client frames to the pipeline; dropping the sender signals disconnect
    let session_id_clone = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match inbound(msg) {
                Inbound::Input(input) => {
                    let end = input == ClientInput::End;
                    if input_tx.send(input).await.is_err() || end {
                        break;
                    }
                }
                Inbound::Ignore => {}
                Inbound::Close => {
                    tracing::info!(session_id = %session_id_clone, "WebSocket closed by client");
                    break;
                }
            }
        }
    });

    let pipeline = Arc::clone(&state.pipeline);
    let run_session_id = session_id.clone();
    let mut pipeline_task = tokio::spawn(async move {
        // Failures are already reported to the client as error events
        let _ = pipeline.run(&run_session_id, input_rx, event_tx).await;
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            pipeline_task.abort();
        }
        _ = &mut pipeline_task => {
            recv_task.abort();
            // Drain queued events before the socket closes
            let _ = send_task.await;
        }
    }

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Classify a client frame
fn inbound(msg: Message) -> Inbound {
    match msg {
        Message::Binary(data) if data.is_empty() || data.as_ref() == END_SENTINEL => {
            Inbound::Input(ClientInput::End)
        }
        Message::Binary(data) => Inbound::Input(ClientInput::Audio(data)),
        Message::Text(text) if text.as_str().as_bytes() == END_SENTINEL => {
            Inbound::Input(ClientInput::End)
        }
        Message::Text(text) => {
            // Older clients send a JSON config frame first; it carries nothing we use
            tracing::debug!(len = text.len(), "ignoring text frame");
            Inbound::Ignore
        }
        Message::Ping(data) => {
            // axum handles pong automatically
            tracing::trace!(len = data.len(), "received ping");
            Inbound::Ignore
        }
        Message::Pong(_) => Inbound::Ignore,
        Message::Close(_) => Inbound::Close,
    }
}

/// Encode a pipeline event for the client
fn outbound(event: ClientEvent, audio_mode: AudioMode) -> Option<Message> {
    match (event, audio_mode) {
        (ClientEvent::Audio { data }, AudioMode::Binary) => Some(Message::Binary(data)),
        (event, _) => match serde_json::to_string(&event) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize client event");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn end_sentinel_in_either_frame_type() {
        assert_eq!(
            inbound(Message::Binary(Bytes::from_static(b"__END__"))),
            Inbound::Input(ClientInput::End)
        );
        assert_eq!(
            inbound(Message::Text("__END__".into())),
            Inbound::Input(ClientInput::End)
        );
        assert_eq!(
            inbound(Message::Binary(Bytes::new())),
            Inbound::Input(ClientInput::End)
        );
    }

    #[test]
    fn binary_frames_are_audio() {
        assert_eq!(
            inbound(Message::Binary(Bytes::from_static(b"\x01\x02"))),
            Inbound::Input(ClientInput::Audio(Bytes::from_static(b"\x01\x02")))
        );
    }

    #[test]
    fn config_text_frames_are_ignored() {
        let frame = r#"{"assemblyai":"k1","gemini":"k2","murf":"k3"}"#;
        assert_eq!(inbound(Message::Text(frame.into())), Inbound::Ignore);
        assert_eq!(inbound(Message::Text("not json".into())), Inbound::Ignore);
    }

    #[test]
    fn audio_goes_out_per_transport() {
        let event = ClientEvent::Audio {
            data: Bytes::from_static(b"RIFF"),
        };

        let binary = outbound(event.clone(), AudioMode::Binary).unwrap();
        assert_eq!(binary, Message::Binary(Bytes::from_static(b"RIFF")));

        let Some(Message::Text(text)) = outbound(event, AudioMode::Base64) else {
            panic!("expected text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["data"], "UklGRg==");
    }

    #[test]
    fn text_events_are_json_in_both_modes() {
        for mode in [AudioMode::Binary, AudioMode::Base64] {
            let event = ClientEvent::Reply {
                text: "Hi".to_string(),
            };
            let Some(Message::Text(text)) = outbound(event, mode) else {
                panic!("expected text frame");
            };
            assert!(text.as_str().contains(r#""type":"gemini""#));
        }
    }
}
