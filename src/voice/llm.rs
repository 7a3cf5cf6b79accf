//! Text generation via Gemini
//!
//! Streaming reads `streamGenerateContent` as server-sent event lines and
//! yields candidate text deltas. Lines that fail to parse are skipped.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{Generator, TextStream};
use crate::config::LlmConfig;
use crate::session::ContextTurn;
use crate::{Error, Result};

const PROVIDER: &str = "gemini";

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl Candidate {
    fn first_text(&self) -> Option<&str> {
        self.content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}

/// Parse one line of a streaming response
///
/// Accepts SSE `data:` lines as well as the bare JSON-array framing. Returns
/// `None` for lines carrying no payload, otherwise the non-empty text deltas
/// of every candidate in the line.
///
/// # Errors
///
/// Returns a protocol error if the payload is not a valid response object
pub fn parse_stream_line(line: &str) -> Option<Result<Vec<String>>> {
    let line = line.trim();
    let payload = line.strip_prefix("data:").unwrap_or(line).trim();
    let payload = payload
        .trim_start_matches(['[', ','])
        .trim_end_matches([']', ','])
        .trim();

    if payload.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return None;
    }

    let parsed = serde_json::from_str::<GenerateResponse>(payload)
        .map_err(|e| Error::protocol(PROVIDER, e))
        .map(|response| {
            response
                .candidates
                .iter()
                .filter_map(Candidate::first_text)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect()
        });
    Some(parsed)
}

/// Splits a byte stream into lines without breaking multi-byte characters
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Remaining partial line, if any
    #[must_use]
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buffer).into_owned())
        }
    }
}

fn deltas(line: &str) -> Vec<String> {
    match parse_stream_line(line) {
        None => Vec::new(),
        Some(Ok(deltas)) => deltas,
        Some(Err(e)) => {
            tracing::debug!(error = %e, line, "skipping malformed generation line");
            Vec::new()
        }
    }
}

/// Gemini generator
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    config: LlmConfig,
}

impl GeminiGenerator {
    /// Create a new generator
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, config: LlmConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        })
    }

    fn request_body(&self, context: &[ContextTurn]) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = context
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.provider_role(),
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();

        json!({
            "contents": contents,
            "system_instruction": { "parts": [{ "text": self.config.system_instruction }] },
        })
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{method}",
            self.config.api_base, self.config.model
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                Error::connection(PROVIDER, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API error");
            return Err(Error::connection(
                PROVIDER,
                format!("Gemini API error {status}: {body}"),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn stream(&self, context: &[ContextTurn]) -> Result<TextStream> {
        let request = self
            .client
            .post(self.url("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .json(&self.request_body(context));
        let response = self.send(request).await?;
        tracing::debug!(turns = context.len(), "generation stream opened");

        let mut body = response.bytes_stream();
        Ok(Box::pin(try_stream! {
            let mut lines = LineDecoder::default();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| Error::connection(PROVIDER, e))?;
                for line in lines.push(&chunk) {
                    for delta in deltas(&line) {
                        yield delta;
                    }
                }
            }
            if let Some(line) = lines.finish() {
                for delta in deltas(&line) {
                    yield delta;
                }
            }
        }))
    }

    async fn generate(&self, context: &[ContextTurn]) -> Result<String> {
        let request = self
            .client
            .post(self.url("generateContent"))
            .timeout(self.config.request_timeout)
            .json(&self.request_body(context));
        let response: GenerateResponse = self.send(request).await?.json().await?;

        response
            .candidates
            .first()
            .and_then(Candidate::first_text)
            .filter(|t| !t.trim().is_empty())
            .map(ToString::to_string)
            .ok_or(Error::EmptyGeneration)
    }
}
