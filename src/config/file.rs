//! TOML configuration file loading
//!
//! Supports `~/.config/voice-relay/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::AudioMode;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfigFile {
    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text generation configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutsFileConfig,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub assemblyai: Option<String>,
    pub gemini: Option<String>,
    pub murf: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP port
    pub port: Option<u16>,

    /// Directory with `index.html` and client assets
    pub static_dir: Option<PathBuf>,

    /// How synthesized audio is sent over the voice WebSocket
    pub audio_mode: Option<AudioMode>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub sample_rate: Option<u32>,
    pub realtime_url: Option<String>,
    pub api_base: Option<String>,
}

/// Text generation configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gemini-2.0-flash")
    pub model: Option<String>,
    pub api_base: Option<String>,
    /// Persona instruction sent with every request
    pub system_instruction: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub stream_url: Option<String>,
    pub sample_rate: Option<u32>,
    pub format: Option<String>,
    pub voice_id: Option<String>,
    pub style: Option<String>,
    pub rate: Option<i32>,
    pub pitch: Option<i32>,
    pub variation: Option<i32>,
}

/// Timeout configuration, in seconds
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    /// Upper bound for one-shot requests
    pub request_secs: Option<u64>,

    /// Interval between transcription job polls
    pub poll_secs: Option<u64>,

    /// Bound on each wait for a streamed fragment or audio chunk (unset = none)
    pub stream_secs: Option<u64>,
}

/// Load the TOML config file
///
/// With an explicit `path` the file must exist and parse. Without one the
/// standard path is tried and `RelayConfigFile::default()` is returned if it
/// is missing or invalid.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<RelayConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(RelayConfigFile::default());
    };

    if !path.exists() {
        return Ok(RelayConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(RelayConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(RelayConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/voice-relay/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-relay").join("config.toml"))
}
