//! Streaming pipeline orchestrator
//!
//! One [`Pipeline::run`] call drives one client connection:
//!
//! ```text
//! client audio ──▶ transcription ──(final)──▶ generation ──(fragment)──▶ synthesis
//!      ▲                 │                        │                          │
//!      └──────── partial/final transcript ◀── reply text ◀──────────── audio chunks
//! ```
//!
//! Transcript events arrive through one channel fed by a background pump, so
//! audio keeps flowing to the provider while a reply is generated. Every
//! client-bound message goes through a single sender in program order.

pub mod oneshot;
mod stages;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::sync::{mpsc, watch};

use crate::session::{ContextTurn, SessionStore, TurnRole, generation_context};
use crate::voice::{
    AudioChunk, AudioSource, Generator, Synthesizer, TranscriptEvent, Transcriber, VoiceSettings,
    encode_audio,
};
use crate::{Error, Result};

pub use stages::{
    FragmentStream, GENERATION_FALLBACK, TRANSCRIPT_FALLBACK, TranscriptFeed, next_within,
    non_empty_transcript, start_generation, start_transcription,
};

/// Client frame that ends audio input
pub const END_SENTINEL: &[u8] = b"__END__";

/// Input from the client-facing channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    /// One frame of microphone audio
    Audio(AudioChunk),
    /// End-of-input sentinel
    End,
}

/// Output to the client-facing channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Connection established
    Connected { session_id: String },
    /// Interim transcript
    PartialTranscript { text: String },
    /// Finalized user utterance
    FinalTranscript { text: String },
    /// Reply text fragment (or fallback reply)
    #[serde(rename = "gemini")]
    Reply { text: String },
    /// Synthesized audio chunk
    Audio {
        #[serde(serialize_with = "serialize_base64")]
        data: Bytes,
    },
    /// Pipeline failure; the connection closes after this
    Error { code: String, error: String },
}

impl ClientEvent {
    /// Error event for a pipeline failure
    #[must_use]
    pub fn error(err: &Error) -> Self {
        Self::Error {
            code: err.code().to_string(),
            error: err.to_string(),
        }
    }
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode_audio(data))
}

/// Per-connection pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    AwaitingAudio,
    Transcribing,
    Generating,
    Synthesizing,
    Closed,
}

impl PipelineState {
    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingAudio, Self::Transcribing)
                | (Self::Transcribing, Self::Generating)
                | (Self::Generating | Self::Synthesizing, Self::Synthesizing | Self::Transcribing)
                | (Self::AwaitingAudio | Self::Transcribing | Self::Generating | Self::Synthesizing, Self::Closed)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingAudio => "awaiting_audio",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why audio input stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputEnd {
    Sentinel,
    Disconnected,
}

/// Wires transcription, generation and synthesis for client connections
pub struct Pipeline {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    sessions: Arc<dyn SessionStore>,
    voice: VoiceSettings,
    stream_timeout: Option<Duration>,
}

impl Pipeline {
    /// Create a pipeline over the given providers and session store
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
            sessions,
            voice: VoiceSettings::default(),
            stream_timeout: None,
        }
    }

    /// Set the synthesis voice
    #[must_use]
    pub fn voice(mut self, voice: VoiceSettings) -> Self {
        self.voice = voice;
        self
    }

    /// Bound each wait for a generation fragment or synthesis chunk
    #[must_use]
    pub const fn stream_timeout(mut self, limit: Option<Duration>) -> Self {
        self.stream_timeout = limit;
        self
    }

    #[must_use]
    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    #[must_use]
    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    #[must_use]
    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synthesizer
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub const fn voice_settings(&self) -> &VoiceSettings {
        &self.voice
    }

    /// Drive one connection until end-of-input, disconnect or failure
    ///
    /// Stage failures are reported to the client as an error event before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns the stage error that closed the pipeline, or
    /// `Error::ClientClosed` if the client went away mid-reply
    pub async fn run(
        &self,
        session_id: &str,
        input: mpsc::Receiver<ClientInput>,
        out: mpsc::Sender<ClientEvent>,
    ) -> Result<()> {
        let mut run = SessionRun {
            pipeline: self,
            session_id,
            out,
            state: PipelineState::AwaitingAudio,
        };

        let result = run.drive(input).await;
        if let Err(ref e) = result {
            if matches!(e, Error::ClientClosed) {
                tracing::info!(session_id, "client went away mid-reply");
            } else {
                tracing::error!(session_id, state = %run.state, error = %e, "pipeline failed");
                let _ = run.out.send(ClientEvent::error(e)).await;
            }
        }

        run.transition(PipelineState::Closed);
        result
    }
}

struct SessionRun<'a> {
    pipeline: &'a Pipeline,
    session_id: &'a str,
    out: mpsc::Sender<ClientEvent>,
    state: PipelineState,
}

impl SessionRun<'_> {
    fn transition(&mut self, next: PipelineState) {
        if self.state == next {
            return;
        }
        debug_assert!(self.state.allows(next), "illegal transition {} -> {next}", self.state);
        tracing::debug!(session_id = self.session_id, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }

    async fn emit(&self, event: ClientEvent) -> Result<()> {
        self.out.send(event).await.map_err(|_| Error::ClientClosed)
    }

    async fn drive(&mut self, mut input: mpsc::Receiver<ClientInput>) -> Result<()> {
        let first = match input.recv().await {
            Some(ClientInput::Audio(chunk)) => chunk,
            Some(ClientInput::End) => {
                tracing::debug!(session_id = self.session_id, "input ended before any audio");
                return Ok(());
            }
            None => return Ok(()),
        };

        self.transition(PipelineState::Transcribing);
        let (ended_tx, ended_rx) = watch::channel(None);
        let audio = audio_source(first, input, ended_tx);
        let mut feed = start_transcription(&self.pipeline.transcriber, audio).await?;

        // A disconnect drops whatever reply is in flight
        let session_id = self.session_id;
        tokio::select! {
            biased;
            () = client_gone(ended_rx.clone()) => {
                tracing::info!(session_id, "client disconnected, dropping in-flight work");
                return Err(Error::ClientClosed);
            }
            result = self.consume(&mut feed) => result?,
        }

        if *ended_rx.borrow() == Some(InputEnd::Sentinel) {
            tracing::info!(session_id, "end of input, session closed");
        } else {
            tracing::info!(session_id, "transcription session ended by provider");
        }
        Ok(())
    }

    async fn consume(&mut self, feed: &mut TranscriptFeed) -> Result<()> {
        while let Some(event) = feed.recv().await {
            match event? {
                TranscriptEvent::Partial(text) => {
                    self.emit(ClientEvent::PartialTranscript { text }).await?;
                }
                TranscriptEvent::Final(text) => self.on_final(&text).await?,
            }
        }
        Ok(())
    }

    async fn on_final(&mut self, text: &str) -> Result<()> {
        let sessions = &self.pipeline.sessions;

        let Ok(text) = non_empty_transcript(text) else {
            tracing::info!(session_id = self.session_id, "empty transcript, replying with fallback");
            sessions.append(self.session_id, TurnRole::Assistant, TRANSCRIPT_FALLBACK.to_string());
            return self
                .emit(ClientEvent::Reply {
                    text: TRANSCRIPT_FALLBACK.to_string(),
                })
                .await;
        };

        tracing::info!(session_id = self.session_id, transcript = %text, "utterance complete");
        self.emit(ClientEvent::FinalTranscript {
            text: text.to_string(),
        })
        .await?;
        sessions.append(self.session_id, TurnRole::User, text.to_string());

        self.transition(PipelineState::Generating);
        let context = generation_context(&sessions.get(self.session_id));
        let reply = self.respond(&context).await?;

        tracing::debug!(session_id = self.session_id, chars = reply.len(), "reply complete");
        sessions.append(self.session_id, TurnRole::Assistant, reply);
        self.transition(PipelineState::Transcribing);
        Ok(())
    }

    /// Stream reply fragments, synthesizing each before the next is sent
    async fn respond(&mut self, context: &[ContextTurn]) -> Result<String> {
        let limit = self.pipeline.stream_timeout;
        let mut fragments = start_generation(&self.pipeline.generator, context).await?;

        let mut reply = String::new();
        while let Some(fragment) = next_within(&mut fragments, limit, "generation").await? {
            if fragment.trim().is_empty() {
                // Trailing whitespace: kept in the transcript, never spoken
                reply.push_str(&fragment);
                continue;
            }

            self.emit(ClientEvent::Reply {
                text: fragment.clone(),
            })
            .await?;

            self.transition(PipelineState::Synthesizing);
            self.speak(&fragment).await?;
            reply.push_str(&fragment);
        }
        Ok(reply)
    }

    async fn speak(&self, fragment: &str) -> Result<()> {
        let limit = self.pipeline.stream_timeout;
        let mut chunks = self
            .pipeline
            .synthesizer
            .stream(fragment, &self.pipeline.voice)
            .await?;

        while let Some(chunk) = next_within(&mut chunks, limit, "synthesis").await? {
            self.emit(ClientEvent::Audio { data: chunk }).await?;
        }
        Ok(())
    }
}

/// Live audio: `first`, then client frames until the sentinel or disconnect
fn audio_source(
    first: AudioChunk,
    mut input: mpsc::Receiver<ClientInput>,
    ended: watch::Sender<Option<InputEnd>>,
) -> AudioSource {
    Box::pin(async_stream::stream! {
        yield first;

        let reason = loop {
            match input.recv().await {
                Some(ClientInput::Audio(chunk)) => {
                    yield chunk;
                }
                Some(ClientInput::End) => break InputEnd::Sentinel,
                None => break InputEnd::Disconnected,
            }
        };

        tracing::debug!(?reason, "audio input ended");
        ended.send_replace(Some(reason));
    })
}

/// Resolves once audio input has ended by disconnect; pending otherwise
async fn client_gone(mut ended: watch::Receiver<Option<InputEnd>>) {
    let gone = ended
        .wait_for(|end| *end == Some(InputEnd::Disconnected))
        .await
        .is_ok();
    if !gone {
        std::future::pending::<()>().await;
    }
}
