//! Provider capabilities: speech-to-text, text generation and text-to-speech
//!
//! Each capability is a trait with a streaming entry point used by the
//! pipeline and a one-shot entry point used by the plain HTTP endpoints.
//! Concrete providers live in the submodules.

mod llm;
mod stt;
mod tts;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::session::ContextTurn;

pub use llm::{GeminiGenerator, LineDecoder, parse_stream_line};
pub use stt::{AssemblyAiTranscriber, ProviderMessage, TIMEOUT_MESSAGE, parse_provider_message};
pub use tts::{MurfSynthesizer, SynthesisMessage, parse_synthesis_message};

/// One frame of client microphone audio
pub type AudioChunk = Bytes;

/// Live audio source handed to a transcriber
pub type AudioSource = BoxStream<'static, AudioChunk>;

/// Transcript events in provider order; ends on session termination
pub type TranscriptStream = BoxStream<'static, Result<TranscriptEvent>>;

/// Raw text deltas from a streaming completion
pub type TextStream = BoxStream<'static, Result<String>>;

/// Decoded audio chunks for one synthesis request
pub type AudioStream = BoxStream<'static, Result<Bytes>>;

/// Transcript event from a streaming transcriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Interim hypothesis; never advances the pipeline
    Partial(String),
    /// End of an utterance
    Final(String),
}

/// Voice used for synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    pub voice_id: String,
    pub style: String,
    pub rate: i32,
    pub pitch: i32,
    pub variation: i32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_id: "en-IN-aarav".to_string(),
            style: "Conversational".to_string(),
            rate: 0,
            pitch: 0,
            variation: 1,
        }
    }
}

/// Speech-to-text provider
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Open a streaming session and forward `audio` to it
    ///
    /// When `audio` ends the provider session is asked to terminate; the
    /// returned stream ends once the provider confirms.
    ///
    /// # Errors
    ///
    /// Returns error if the provider session cannot be established
    async fn stream(&self, audio: AudioSource) -> Result<TranscriptStream>;

    /// Transcribe a complete recording
    ///
    /// # Errors
    ///
    /// Returns error if upload, job creation or polling fails, or if the job
    /// does not finish within the one-shot time bound
    async fn transcribe(&self, audio: Bytes) -> Result<String>;
}

/// Text-generation provider
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start a streaming completion for `context`
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or is rejected
    async fn stream(&self, context: &[ContextTurn]) -> Result<TextStream>;

    /// Single completion; text of the first candidate
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyGeneration` if the provider returned no candidates
    /// or only whitespace, or another error if the request fails
    async fn generate(&self, context: &[ContextTurn]) -> Result<String>;
}

/// Text-to-speech provider
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Open an independent synthesis session for `text`
    ///
    /// # Errors
    ///
    /// Returns error if the provider session cannot be established
    async fn stream(&self, text: &str, voice: &VoiceSettings) -> Result<AudioStream>;

    /// Synthesize `text` and return the whole asset base64-encoded
    ///
    /// # Errors
    ///
    /// Returns error if any part of the synthesis stream fails
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<String> {
        let mut audio = Vec::new();
        let mut chunks = self.stream(text, voice).await?;
        while let Some(chunk) = chunks.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(BASE64.encode(audio))
    }
}

/// Encode an audio chunk for a text transport
#[must_use]
pub fn encode_audio(chunk: &[u8]) -> String {
    BASE64.encode(chunk)
}

/// Decode an audio chunk from a text transport
///
/// # Errors
///
/// Returns error if `data` is not valid base64
pub fn decode_audio(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}
