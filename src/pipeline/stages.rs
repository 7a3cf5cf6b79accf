//! Stage adapters between providers and the orchestrator

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::voice::{AudioSource, Generator, TranscriptEvent, Transcriber};
use crate::session::ContextTurn;
use crate::{Error, Result};

/// Fallback reply when generation yields nothing usable
pub const GENERATION_FALLBACK: &str = "Sorry, I couldn't generate a response right now.";

/// Fallback reply when the user's speech could not be heard
pub const TRANSCRIPT_FALLBACK: &str =
    "I couldn't hear you. Please speak louder or check your microphone.";

/// Ordered fragments of one generated reply
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Reject empty or whitespace-only transcripts
///
/// # Errors
///
/// Returns `Error::EmptyTranscript` if `text` has no visible characters
pub fn non_empty_transcript(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        Err(Error::EmptyTranscript)
    } else {
        Ok(text)
    }
}

/// Transcript events delivered over a channel by a background pump
///
/// Dropping the handle aborts the pump and with it the provider session.
pub struct TranscriptFeed {
    events: mpsc::Receiver<Result<TranscriptEvent>>,
    pump: JoinHandle<()>,
}

impl TranscriptFeed {
    /// Next event in provider order; `None` once the session has ended
    pub async fn recv(&mut self) -> Option<Result<TranscriptEvent>> {
        self.events.recv().await
    }
}

impl Drop for TranscriptFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Start the transcription stage
///
/// The provider session forwards `audio` and pushes events through a single
/// bounded channel. A provider error is delivered as the final item.
///
/// # Errors
///
/// Returns error if the provider session cannot be established
pub async fn start_transcription(
    transcriber: &Arc<dyn Transcriber>,
    audio: AudioSource,
) -> Result<TranscriptFeed> {
    let mut stream = transcriber.stream(audio).await?;
    let (tx, events) = mpsc::channel(32);

    let pump = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let failed = event.is_err();
            if tx.send(event).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(TranscriptFeed { events, pump })
}

/// Start the generation stage for `context`
///
/// Whitespace-only deltas are held back until a delta with visible text
/// arrives and are then merged into it. Whitespace still held when the
/// provider stream ends is produced as a final blank fragment, so the
/// fragments always concatenate to the provider's text. If the stream ends
/// without any visible text a single fallback fragment is produced instead.
/// Provider errors end the stream.
///
/// # Errors
///
/// Returns error if the provider request fails to start
pub async fn start_generation(
    generator: &Arc<dyn Generator>,
    context: &[ContextTurn],
) -> Result<FragmentStream> {
    let mut deltas = generator.stream(context).await?;

    Ok(Box::pin(try_stream! {
        let mut pending = String::new();
        let mut produced = false;

        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if delta.trim().is_empty() {
                pending.push_str(&delta);
                continue;
            }

            produced = true;
            let fragment = if pending.is_empty() {
                delta
            } else {
                std::mem::take(&mut pending) + &delta
            };
            yield fragment;
        }

        if !produced {
            tracing::warn!(error = %Error::EmptyGeneration, "using fallback reply");
            yield GENERATION_FALLBACK.to_string();
        } else if !pending.is_empty() {
            yield pending;
        }
    }))
}

/// Await the next item of a stage stream, bounded by `limit` if set
///
/// # Errors
///
/// Returns `Error::UpstreamTimeout` if the bound expires
pub async fn next_within<T>(
    stream: &mut BoxStream<'static, Result<T>>,
    limit: Option<Duration>,
    stage: &str,
) -> Result<Option<T>> {
    let next = match limit {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| Error::UpstreamTimeout(format!("{stage} timed out after {limit:?}")))?,
        None => stream.next().await,
    };
    next.transpose()
}
