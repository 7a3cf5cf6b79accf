//! One-shot voice endpoints for uploaded recordings and text

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::pipeline::oneshot::{self, ChatEvent, ProcessAudioResponse};
use crate::session::Turn;
use crate::voice::encode_audio;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/process-audio/{session_id}", post(process_audio))
        .route("/stream-chat/{session_id}", post(stream_chat))
        .route("/stream-murf-tts/{session_id}", get(stream_tts))
        .route("/api/sessions/{session_id}", get(session_history))
        .with_state(state)
}

/// Read the `file` field of a multipart upload
async fn read_upload(mut multipart: Multipart) -> Result<Bytes, VoiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VoiceError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| VoiceError::BadRequest(e.to_string()))?;
        if data.is_empty() {
            return Err(VoiceError::BadRequest("Empty audio data".to_string()));
        }
        return Ok(data);
    }

    Err(VoiceError::BadRequest("Missing `file` field".to_string()))
}

/// Transcribe, reply and synthesize an uploaded recording
async fn process_audio(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<ProcessAudioResponse>, VoiceError> {
    let audio = read_upload(multipart).await?;
    tracing::info!(session_id = %session_id, bytes = audio.len(), "processing uploaded audio");

    Ok(Json(
        oneshot::process_audio(&state.pipeline, &session_id, audio).await,
    ))
}

/// Stream the reply to an uploaded recording as server-sent events
///
/// Events: `gemini` with the reply text, then `audio` with base64 chunks.
/// Failures arrive as a final `error` event.
async fn stream_chat(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, VoiceError> {
    let audio = read_upload(multipart).await?;
    tracing::info!(session_id = %session_id, bytes = audio.len(), "streaming chat for uploaded audio");

    let events = oneshot::stream_chat(Arc::clone(&state.pipeline), session_id, audio).map(|event| {
        let event = match event {
            ChatEvent::Reply(text) => Event::default().event("gemini").data(text),
            ChatEvent::Audio(chunk) => Event::default().event("audio").data(encode_audio(&chunk)),
            ChatEvent::Error(message) => Event::default().event("error").data(message),
        };
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Query for text-to-speech streaming
#[derive(Debug, Deserialize)]
struct TtsQuery {
    text: String,
}

/// Stream synthesized audio for `text` as it arrives
async fn stream_tts(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    Query(query): Query<TtsQuery>,
) -> Result<Response, VoiceError> {
    if query.text.trim().is_empty() {
        return Err(VoiceError::BadRequest("Empty text".to_string()));
    }

    tracing::debug!(session_id = %session_id, chars = query.text.len(), "streaming synthesis");
    let pipeline = &state.pipeline;
    let chunks = pipeline
        .synthesizer()
        .stream(&query.text, pipeline.voice_settings())
        .await
        .map_err(|e| VoiceError::SynthesisFailed(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/wav")],
        Body::from_stream(chunks),
    )
        .into_response())
}

/// Session history response
#[derive(Debug, Serialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

/// Get the ordered turns of a session
async fn session_history(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
) -> Json<SessionHistory> {
    let turns = state.pipeline.sessions().get(&session_id);
    Json(SessionHistory { session_id, turns })
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    BadRequest(String),
    SynthesisFailed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::SynthesisFailed(msg) => (StatusCode::BAD_GATEWAY, "synthesis_failed", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
