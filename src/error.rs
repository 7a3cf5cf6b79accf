//! Error types for the voice relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or handshake failure talking to a provider
    #[error("{provider} connection error: {message}")]
    ProviderConnection {
        provider: &'static str,
        message: String,
    },

    /// Malformed or unexpected provider message
    #[error("{provider} protocol error: {message}")]
    ProviderProtocol {
        provider: &'static str,
        message: String,
    },

    /// Upstream call exceeded its time bound
    #[error("{0}")]
    UpstreamTimeout(String),

    /// Provider finished a transcription job with `failed` status
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Transcript was empty (silence or inaudible input).
    /// Recovered with fallback text, never surfaced to the client as a failure
    #[error("empty transcript")]
    EmptyTranscript,

    /// Generation produced nothing usable.
    /// Recovered with fallback text, never surfaced to the client as a failure
    #[error("empty generation")]
    EmptyGeneration,

    /// Client-facing channel closed
    #[error("client channel closed")]
    ClientClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a connection error for a named provider
    pub fn connection(provider: &'static str, message: impl ToString) -> Self {
        Self::ProviderConnection {
            provider,
            message: message.to_string(),
        }
    }

    /// Build a protocol error for a named provider
    pub fn protocol(provider: &'static str, message: impl ToString) -> Self {
        Self::ProviderProtocol {
            provider,
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code, used in client error events
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::ProviderConnection { .. } | Self::Http(_) => "provider_connection_error",
            Self::ProviderProtocol { .. } | Self::Serialization(_) => "provider_protocol_error",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::TranscriptionFailed(_) => "transcription_failed",
            Self::EmptyTranscript => "empty_transcript",
            Self::EmptyGeneration => "empty_generation",
            Self::ClientClosed => "client_closed",
            Self::Io(_) | Self::Toml(_) => "internal_error",
        }
    }

    /// Whether this error is recovered locally with fallback text
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::EmptyTranscript | Self::EmptyGeneration)
    }
}
