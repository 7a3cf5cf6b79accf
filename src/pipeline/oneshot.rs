//! Request/response variants of the pipeline for uploaded recordings

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use super::{GENERATION_FALLBACK, Pipeline, TRANSCRIPT_FALLBACK};
use crate::Error;
use crate::session::{Turn, TurnRole, generation_context};

/// Result of `POST /process-audio/{session_id}`
#[derive(Debug, Clone, Serialize)]
pub struct ProcessAudioResponse {
    /// Transcript of the recording; empty if nothing was heard
    pub text: String,
    /// Assistant reply
    pub gemini: Option<String>,
    /// Synthesized reply, base64 WAV
    pub audio_base64: Option<String>,
    /// Session history after this exchange
    pub history: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessAudioResponse {
    fn failed(error: String) -> Self {
        Self {
            text: String::new(),
            gemini: None,
            audio_base64: None,
            history: Vec::new(),
            error: Some(error),
        }
    }
}

/// Event of a streamed chat exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Complete reply text
    Reply(String),
    /// One synthesized audio chunk
    Audio(Bytes),
    /// Failure; the exchange ends after this
    Error(String),
}

/// User-facing message for a failed one-shot transcription
#[must_use]
pub fn transcription_message(err: &Error) -> String {
    match err {
        Error::TranscriptionFailed(_) => "Transcription failed.".to_string(),
        Error::UpstreamTimeout(message) => message.clone(),
        other => format!("Transcription service error: {other}"),
    }
}

/// Transcribe, reply and synthesize one uploaded recording
///
/// Never fails: transcription errors are reported in the `error` field,
/// generation errors fall back to a fixed reply and synthesis errors leave
/// `audio_base64` empty.
pub async fn process_audio(pipeline: &Pipeline, session_id: &str, audio: Bytes) -> ProcessAudioResponse {
    let sessions = pipeline.sessions();

    let transcript = match pipeline.transcriber().transcribe(audio).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(session_id, error = %e, "transcription failed");
            return ProcessAudioResponse::failed(transcription_message(&e));
        }
    };

    let transcript = transcript.trim();
    if transcript.is_empty() {
        tracing::info!(session_id, "empty transcript, replying with fallback");
        sessions.append(session_id, TurnRole::Assistant, TRANSCRIPT_FALLBACK.to_string());
        return ProcessAudioResponse {
            text: String::new(),
            gemini: Some(TRANSCRIPT_FALLBACK.to_string()),
            audio_base64: None,
            history: sessions.get(session_id),
            error: None,
        };
    }

    sessions.append(session_id, TurnRole::User, transcript.to_string());
    let context = generation_context(&sessions.get(session_id));

    let reply = match pipeline.generator().generate(&context).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(session_id, "empty generation, using fallback reply");
            GENERATION_FALLBACK.to_string()
        }
        Err(e) if e.is_recoverable() => {
            tracing::info!(session_id, error = %e, "using fallback reply");
            GENERATION_FALLBACK.to_string()
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "generation failed, using fallback reply");
            GENERATION_FALLBACK.to_string()
        }
    };
    sessions.append(session_id, TurnRole::Assistant, reply.clone());

    let audio_base64 = match pipeline
        .synthesizer()
        .synthesize(&reply, pipeline.voice_settings())
        .await
    {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "synthesis failed");
            None
        }
    };

    ProcessAudioResponse {
        text: transcript.to_string(),
        gemini: Some(reply),
        audio_base64,
        history: sessions.get(session_id),
        error: None,
    }
}

/// Transcribe one uploaded recording, then stream the reply and its audio
///
/// The reply is generated in one piece and recorded in the session before it
/// is emitted; audio chunks follow as the synthesizer produces them.
#[must_use]
pub fn stream_chat(pipeline: Arc<Pipeline>, session_id: String, audio: Bytes) -> BoxStream<'static, ChatEvent> {
    Box::pin(async_stream::stream! {
        let sessions = Arc::clone(pipeline.sessions());

        let transcript = match pipeline.transcriber().transcribe(audio).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "transcription failed");
                yield ChatEvent::Error(transcription_message(&e));
                return;
            }
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            yield ChatEvent::Error(TRANSCRIPT_FALLBACK.to_string());
            return;
        }

        sessions.append(&session_id, TurnRole::User, transcript.to_string());
        let context = generation_context(&sessions.get(&session_id));

        let reply = match pipeline.generator().generate(&context).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => GENERATION_FALLBACK.to_string(),
            Err(e) if e.is_recoverable() => {
                tracing::info!(session_id = %session_id, error = %e, "using fallback reply");
                GENERATION_FALLBACK.to_string()
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "generation failed");
                yield ChatEvent::Error(format!("Generation error: {e}"));
                return;
            }
        };
        sessions.append(&session_id, TurnRole::Assistant, reply.clone());
        yield ChatEvent::Reply(reply.clone());

        let mut chunks = match pipeline.synthesizer().stream(&reply, pipeline.voice_settings()).await {
            Ok(chunks) => chunks,
            Err(e) => {
                yield ChatEvent::Error(format!("Synthesis error: {e}"));
                return;
            }
        };
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    yield ChatEvent::Audio(chunk);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "synthesis stream failed");
                    yield ChatEvent::Error(format!("Synthesis error: {e}"));
                    return;
                }
            }
        }
    })
}
