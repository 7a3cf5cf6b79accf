//! Speech-to-text via `AssemblyAI`
//!
//! Streaming uses the realtime WebSocket API; one-shot uploads the recording,
//! creates a transcription job and polls it.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};

use super::{AudioChunk, AudioSource, TranscriptEvent, TranscriptStream, Transcriber};
use crate::config::SttConfig;
use crate::{Error, Result};

const PROVIDER: &str = "assemblyai";

/// Message shown when the one-shot path exceeds its time bound
pub const TIMEOUT_MESSAGE: &str =
    "Transcription service timed out. Please try again or check your network connection.";

/// Decoded realtime message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMessage {
    SessionBegins,
    Partial(String),
    Final(String),
    SessionTerminated,
    Error(String),
    /// Any other `message_type`; ignored
    Other(String),
}

#[derive(Deserialize)]
struct RealtimeMessage {
    message_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one realtime text frame
///
/// # Errors
///
/// Returns a protocol error if the frame is not a JSON object
pub fn parse_provider_message(raw: &str) -> Result<ProviderMessage> {
    let msg: RealtimeMessage =
        serde_json::from_str(raw).map_err(|e| Error::protocol(PROVIDER, e))?;

    if let Some(error) = msg.error {
        return Ok(ProviderMessage::Error(error));
    }

    let text = msg.text.unwrap_or_default();
    Ok(match msg.message_type.as_deref() {
        Some("SessionBegins") => ProviderMessage::SessionBegins,
        Some("PartialTranscript") => ProviderMessage::Partial(text),
        Some("FinalTranscript") => ProviderMessage::Final(text),
        Some("SessionTerminated") => ProviderMessage::SessionTerminated,
        other => ProviderMessage::Other(other.unwrap_or_default().to_string()),
    })
}

/// Transcription job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JobStatus {
    Queued,
    Processing,
    Completed,
    #[serde(alias = "failed")]
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
    status: JobStatus,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// `AssemblyAI` transcriber
pub struct AssemblyAiTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    config: SttConfig,
}

impl AssemblyAiTranscriber {
    /// Create a new transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: SecretString, config: SttConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("AssemblyAI API key required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    async fn upload_and_poll(&self, audio: Bytes) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "uploading audio for transcription");

        let response = self
            .client
            .post(format!("{}/upload", self.config.api_base))
            .header("authorization", self.api_key.expose_secret())
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(map_request_error)?;
        let upload: UploadResponse = check_status(response).await?.json().await?;

        let response = self
            .client
            .post(format!("{}/transcript", self.config.api_base))
            .header("authorization", self.api_key.expose_secret())
            .json(&serde_json::json!({ "audio_url": upload.upload_url }))
            .send()
            .await
            .map_err(map_request_error)?;
        let job: JobResponse = check_status(response).await?.json().await?;
        tracing::debug!(job_id = %job.id, "transcription job created");

        loop {
            let response = self
                .client
                .get(format!("{}/transcript/{}", self.config.api_base, job.id))
                .header("authorization", self.api_key.expose_secret())
                .send()
                .await
                .map_err(map_request_error)?;
            let poll: JobResponse = check_status(response).await?.json().await?;

            match poll.status {
                JobStatus::Completed => {
                    let text = poll.text.unwrap_or_default();
                    tracing::info!(transcript = %text, "transcription complete");
                    return Ok(text);
                }
                JobStatus::Error => {
                    let reason = poll.error.unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!(job_id = %poll.id, reason = %reason, "transcription job failed");
                    return Err(Error::TranscriptionFailed(reason));
                }
                JobStatus::Queued | JobStatus::Processing | JobStatus::Unknown => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn stream(&self, audio: AudioSource) -> Result<TranscriptStream> {
        let url = format!(
            "{}?sample_rate={}",
            self.config.realtime_url, self.config.sample_rate
        );
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::connection(PROVIDER, e))?;
        let auth = HeaderValue::from_str(self.api_key.expose_secret())
            .map_err(|e| Error::Config(format!("invalid AssemblyAI API key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription session connect failed");
                Error::connection(PROVIDER, e)
            })?;
        tracing::debug!("transcription session opened");

        Ok(transcript_events(socket, audio))
    }

    async fn transcribe(&self, audio: Bytes) -> Result<String> {
        tokio::time::timeout(self.config.request_timeout, self.upload_and_poll(audio))
            .await
            .map_err(|_| Error::UpstreamTimeout(TIMEOUT_MESSAGE.to_string()))?
    }
}

enum Step {
    Audio(Option<AudioChunk>),
    Provider(Option<std::result::Result<Message, tungstenite::Error>>),
}

/// Forward audio and read events on one socket until the session ends
fn transcript_events<S>(socket: S, mut audio: AudioSource) -> TranscriptStream
where
    S: futures::Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + futures::Sink<Message, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    let (mut sink, mut source) = socket.split();

    Box::pin(try_stream! {
        let mut input_done = false;

        loop {
            let step = tokio::select! {
                chunk = audio.next(), if !input_done => Step::Audio(chunk),
                msg = source.next() => Step::Provider(msg),
            };

            match step {
                Step::Audio(Some(chunk)) => {
                    sink.send(Message::Binary(chunk))
                        .await
                        .map_err(|e| Error::connection(PROVIDER, e))?;
                }
                Step::Audio(None) => {
                    input_done = true;
                    tracing::debug!("audio source ended, terminating transcription session");
                    let terminate = serde_json::json!({ "terminate_session": true }).to_string();
                    sink.send(Message::text(terminate))
                        .await
                        .map_err(|e| Error::connection(PROVIDER, e))?;
                }
                Step::Provider(Some(Ok(Message::Text(raw)))) => {
                    match parse_provider_message(&raw)? {
                        ProviderMessage::Partial(text) if !text.is_empty() => {
                            yield TranscriptEvent::Partial(text);
                        }
                        ProviderMessage::Final(text) => {
                            yield TranscriptEvent::Final(text);
                        }
                        ProviderMessage::SessionTerminated => {
                            tracing::debug!("transcription session terminated by provider");
                            break;
                        }
                        ProviderMessage::Error(message) => {
                            tracing::error!(error = %message, "transcription provider error");
                            Err::<(), _>(Error::protocol(PROVIDER, message))?;
                        }
                        ProviderMessage::SessionBegins => {
                            tracing::debug!("transcription session started");
                        }
                        ProviderMessage::Partial(_) | ProviderMessage::Other(_) => {}
                    }
                }
                Step::Provider(Some(Ok(Message::Close(_))) | None) => {
                    if input_done {
                        break;
                    }
                    Err::<(), _>(Error::connection(PROVIDER, "provider disconnected"))?;
                }
                Step::Provider(Some(Ok(_))) => {}
                Step::Provider(Some(Err(e))) => {
                    Err::<(), _>(Error::connection(PROVIDER, e))?;
                }
            }
        }

        let _ = sink.close().await;
    })
}

/// Map transport timeouts to the one-shot timeout error
fn map_request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::UpstreamTimeout(TIMEOUT_MESSAGE.to_string())
    } else {
        Error::connection(PROVIDER, e)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "AssemblyAI API error");
    Err(Error::connection(
        PROVIDER,
        format!("AssemblyAI API error {status}: {body}"),
    ))
}
