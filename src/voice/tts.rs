//! Text-to-speech via Murf streaming WebSocket

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::{AudioStream, Synthesizer, VoiceSettings, decode_audio};
use crate::config::TtsConfig;
use crate::{Error, Result};

const PROVIDER: &str = "murf";

/// Decoded synthesis frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisMessage {
    /// Decoded audio carried by the frame, if any
    pub audio: Option<Vec<u8>>,
    /// Provider marked the context as complete
    pub is_final: bool,
}

#[derive(Deserialize)]
struct RawSynthesisMessage {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "final")]
    is_final: bool,
}

/// Parse one synthesis text frame
///
/// # Errors
///
/// Returns a protocol error if the frame is not JSON or its audio is not
/// valid base64
pub fn parse_synthesis_message(raw: &str) -> Result<SynthesisMessage> {
    let msg: RawSynthesisMessage =
        serde_json::from_str(raw).map_err(|e| Error::protocol(PROVIDER, e))?;

    let audio = msg
        .audio
        .map(|data| decode_audio(&data))
        .transpose()
        .map_err(|e| Error::protocol(PROVIDER, format!("invalid audio payload: {e}")))?;

    Ok(SynthesisMessage {
        audio,
        is_final: msg.is_final,
    })
}

/// Murf synthesizer; one provider session per call
pub struct MurfSynthesizer {
    api_key: SecretString,
    config: TtsConfig,
}

impl MurfSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, config: TtsConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Murf API key required".to_string()));
        }

        Ok(Self { api_key, config })
    }

    fn stream_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.stream_url)
            .map_err(|e| Error::Config(format!("invalid Murf stream URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-key", self.api_key.expose_secret())
            .append_pair("sample_rate", &self.config.sample_rate.to_string())
            .append_pair("channel_type", &self.config.channel_type)
            .append_pair("format", &self.config.format);
        Ok(url)
    }
}

#[async_trait]
impl Synthesizer for MurfSynthesizer {
    async fn stream(&self, text: &str, voice: &VoiceSettings) -> Result<AudioStream> {
        let url = self.stream_url()?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "synthesis session connect failed");
                Error::connection(PROVIDER, e)
            })?;

        let context_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(context_id = %context_id, chars = text.len(), "synthesis session opened");

        Ok(synthesis_chunks(socket, context_id, text.to_string(), voice.clone()))
    }
}

/// Send the voice config and text, then read audio until `final`
fn synthesis_chunks<S>(
    socket: S,
    context_id: String,
    text: String,
    voice: VoiceSettings,
) -> AudioStream
where
    S: futures::Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + futures::Sink<Message, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    let (mut sink, mut source) = socket.split();

    Box::pin(try_stream! {
        let voice_config = json!({ "voice_config": voice }).to_string();
        sink.send(Message::text(voice_config))
            .await
            .map_err(|e| Error::connection(PROVIDER, e))?;

        let request = json!({ "context_id": context_id, "text": text, "end": true }).to_string();
        sink.send(Message::text(request))
            .await
            .map_err(|e| Error::connection(PROVIDER, e))?;

        loop {
            match source.next().await {
                Some(Ok(Message::Text(raw))) => {
                    let msg = parse_synthesis_message(&raw)?;
                    if let Some(audio) = msg.audio {
                        yield Bytes::from(audio);
                    }
                    if msg.is_final {
                        tracing::debug!(context_id = %context_id, "synthesis complete");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    Err::<(), _>(Error::connection(PROVIDER, "connection closed before final audio"))?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    Err::<(), _>(Error::connection(PROVIDER, e))?;
                }
            }
        }

        let _ = sink.close().await;
    })
}
