//! Configuration management for the voice relay

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::voice::VoiceSettings;
use crate::{Error, Result};

/// Default persona instruction for the generation provider
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a human. Your name is Nick. You are a helpful, \
friendly, and conversational voice assistant. If someone greets you by name (Nick), respond \
warmly as Nick.";

/// Voice relay configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Provider API keys
    pub api_keys: ApiKeys,

    /// Speech-to-text provider configuration
    pub stt: SttConfig,

    /// Text generation provider configuration
    pub llm: LlmConfig,

    /// Text-to-speech provider configuration
    pub tts: TtsConfig,

    /// Bound on each wait for a generation fragment or synthesis chunk in the
    /// streaming pipeline. `None` means no bound
    pub stream_timeout: Option<Duration>,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web client)
    pub static_dir: Option<PathBuf>,

    /// Default audio transport for the voice WebSocket
    pub audio_mode: AudioMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            static_dir: None,
            audio_mode: AudioMode::default(),
        }
    }
}

/// How synthesized audio is delivered on the voice WebSocket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Raw binary frames
    #[default]
    Binary,
    /// Base64 inside a JSON `audio` message
    Base64,
}

impl FromStr for AudioMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "base64" => Ok(Self::Base64),
            other => Err(Error::Config(format!("unknown audio mode: {other}"))),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `AssemblyAI` key (speech-to-text)
    pub assemblyai: Option<SecretString>,

    /// Gemini key (text generation)
    pub gemini: Option<SecretString>,

    /// Murf key (text-to-speech)
    pub murf: Option<SecretString>,
}

/// A provider key as named in the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyName {
    pub env: &'static str,
    pub placeholder: &'static str,
}

/// Keys the relay needs, with the placeholder values written by setup scripts
pub const REQUIRED_KEYS: [KeyName; 3] = [
    KeyName {
        env: "ASSEMBLYAI_API_KEY",
        placeholder: "your_assemblyai_api_key_here",
    },
    KeyName {
        env: "GEMINI_API_KEY",
        placeholder: "your_gemini_api_key_here",
    },
    KeyName {
        env: "MURF_API_KEY",
        placeholder: "your_murf_api_key_here",
    },
];

impl ApiKeys {
    /// Environment names of keys that are unset or still placeholders
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [&self.assemblyai, &self.gemini, &self.murf]
            .into_iter()
            .zip(REQUIRED_KEYS)
            .filter(|(key, name)| {
                key.as_ref()
                    .is_none_or(|k| k.expose_secret().trim().is_empty() || k.expose_secret() == name.placeholder)
            })
            .map(|(_, name)| name.env)
            .collect()
    }
}

/// Speech-to-text provider configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Realtime WebSocket endpoint
    pub realtime_url: String,

    /// REST API base for one-shot transcription
    pub api_base: String,

    /// Sample rate of client audio in Hz
    pub sample_rate: u32,

    /// Interval between job status polls
    pub poll_interval: Duration,

    /// Upper bound for a whole one-shot transcription
    pub request_timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            realtime_url: "wss://api.assemblyai.com/v2/realtime/ws".to_string(),
            api_base: "https://api.assemblyai.com/v2".to_string(),
            sample_rate: 16_000,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Text generation provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    pub system_instruction: String,
    /// Upper bound for a one-shot completion
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Text-to-speech provider configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub stream_url: String,
    pub sample_rate: u32,
    pub channel_type: String,
    pub format: String,
    pub voice: VoiceSettings,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            stream_url: "wss://api.murf.ai/v1/speech/stream-input".to_string(),
            sample_rate: 44_100,
            channel_type: "MONO".to_string(),
            format: "WAV".to_string(),
            voice: VoiceSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or an
    /// environment value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment value is invalid
    pub fn from_sources(
        fc: file::RelayConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let secret = |value: Option<String>| value.map(SecretString::from);

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            assemblyai: secret(
                env("ASSEMBLYAI_API_KEY")
                    .or_else(|| env("ASSEMBLY_API_KEY"))
                    .or(fc.api_keys.assemblyai),
            ),
            gemini: secret(env("GEMINI_API_KEY").or(fc.api_keys.gemini)),
            murf: secret(env("MURF_API_KEY").or(fc.api_keys.murf)),
        };

        let audio_mode = match env("VOICE_RELAY_AUDIO_MODE") {
            Some(mode) => mode.parse()?,
            None => fc.server.audio_mode.unwrap_or_default(),
        };

        let server = ServerConfig {
            port: env("VOICE_RELAY_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(8000),
            static_dir: env("VOICE_RELAY_STATIC_DIR")
                .map(PathBuf::from)
                .or(fc.server.static_dir),
            audio_mode,
        };

        let request_timeout = fc
            .timeouts
            .request_secs
            .map_or(Duration::from_secs(30), Duration::from_secs);

        let stt_defaults = SttConfig::default();
        let stt = SttConfig {
            realtime_url: fc.stt.realtime_url.unwrap_or(stt_defaults.realtime_url),
            api_base: fc.stt.api_base.unwrap_or(stt_defaults.api_base),
            sample_rate: fc.stt.sample_rate.unwrap_or(stt_defaults.sample_rate),
            poll_interval: fc
                .timeouts
                .poll_secs
                .map_or(stt_defaults.poll_interval, Duration::from_secs),
            request_timeout,
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_base: fc.llm.api_base.unwrap_or(llm_defaults.api_base),
            model: env("GEMINI_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
            system_instruction: fc
                .llm
                .system_instruction
                .unwrap_or(llm_defaults.system_instruction),
            request_timeout,
        };

        let tts_defaults = TtsConfig::default();
        let voice_defaults = tts_defaults.voice;
        let tts = TtsConfig {
            stream_url: fc.tts.stream_url.unwrap_or(tts_defaults.stream_url),
            sample_rate: fc.tts.sample_rate.unwrap_or(tts_defaults.sample_rate),
            channel_type: tts_defaults.channel_type,
            format: fc.tts.format.unwrap_or(tts_defaults.format),
            voice: VoiceSettings {
                voice_id: env("MURF_VOICE_ID")
                    .or(fc.tts.voice_id)
                    .unwrap_or(voice_defaults.voice_id),
                style: fc.tts.style.unwrap_or(voice_defaults.style),
                rate: fc.tts.rate.unwrap_or(voice_defaults.rate),
                pitch: fc.tts.pitch.unwrap_or(voice_defaults.pitch),
                variation: fc.tts.variation.unwrap_or(voice_defaults.variation),
            },
        };

        let stream_timeout = match env("VOICE_RELAY_STREAM_TIMEOUT") {
            Some(secs) => Some(secs.parse::<u64>().map_err(|e| {
                Error::Config(format!("invalid VOICE_RELAY_STREAM_TIMEOUT: {e}"))
            })?),
            None => fc.timeouts.stream_secs,
        }
        .map(Duration::from_secs);

        Ok(Self {
            server,
            api_keys,
            stt,
            llm,
            tts,
            stream_timeout,
        })
    }
}
