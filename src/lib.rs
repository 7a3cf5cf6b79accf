//! Voice Relay - Real-time voice conversations over hosted speech and language providers
//!
//! This library provides the core functionality for the relay:
//! - Streaming speech-to-text, text generation and text-to-speech providers
//! - A per-connection pipeline that chains them
//! - In-memory conversation history per session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Browser client                        │
//! │   mic audio ─▶ /ws/voice ◀─ transcripts, text, audio │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Voice Relay                         │
//! │   Pipeline  │  Session Store  │  One-shot endpoints  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Providers                           │
//! │   AssemblyAI (STT)  │  Gemini (LLM)  │  Murf (TTS)   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{ClientEvent, ClientInput, Pipeline};
pub use session::{InMemorySessionStore, SessionStore, Turn, TurnRole};
