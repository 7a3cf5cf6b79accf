//! Shared test utilities: scripted providers and pipeline drivers

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use voice_relay::api::ApiServerBuilder;
use voice_relay::session::ContextTurn;
use voice_relay::voice::{
    AudioSource, AudioStream, Generator, Synthesizer, TextStream, TranscriptEvent,
    TranscriptStream, Transcriber, VoiceSettings,
};
use voice_relay::{ClientEvent, ClientInput, Error, InMemorySessionStore, Pipeline, Result};

/// When a streaming transcriber emits its script
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// After all audio has been consumed
    #[default]
    AfterInput,
    /// As soon as the first audio frame arrives, while input stays open
    AfterFirstFrame,
    /// A single final transcript of the received audio, read as UTF-8
    Echo,
}

/// Transcriber that consumes audio and replays a script
#[derive(Default)]
pub struct ScriptedTranscriber {
    script: Mutex<Vec<Result<TranscriptEvent>>>,
    timing: Timing,
    one_shot: Mutex<Option<Result<String>>>,
    pub received: Arc<Mutex<Vec<Bytes>>>,
    pub sessions: AtomicUsize,
    pub one_shot_calls: AtomicUsize,
}

impl ScriptedTranscriber {
    #[must_use]
    pub fn streaming(script: Vec<Result<TranscriptEvent>>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Emit `script` while the client is still sending audio
    #[must_use]
    pub fn live(script: Vec<Result<TranscriptEvent>>) -> Self {
        Self {
            script: Mutex::new(script),
            timing: Timing::AfterFirstFrame,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn echo() -> Self {
        Self {
            timing: Timing::Echo,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn one_shot(result: Result<String>) -> Self {
        Self {
            one_shot: Mutex::new(Some(result)),
            ..Self::default()
        }
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn stream(&self, mut audio: AudioSource) -> Result<TranscriptStream> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        let received = Arc::clone(&self.received);
        let timing = self.timing;

        Ok(Box::pin(async_stream::stream! {
            let mut heard = Vec::new();
            let mut script = Some(script);

            while let Some(chunk) = audio.next().await {
                received.lock().unwrap().push(chunk.clone());
                heard.extend_from_slice(&chunk);
                if timing == Timing::AfterFirstFrame {
                    for event in script.take().into_iter().flatten() {
                        yield event;
                    }
                }
            }

            if timing == Timing::Echo {
                yield Ok(TranscriptEvent::Final(String::from_utf8_lossy(&heard).into_owned()));
            }
            for event in script.take().into_iter().flatten() {
                yield event;
            }
        }))
    }

    async fn transcribe(&self, _audio: Bytes) -> Result<String> {
        self.one_shot_calls.fetch_add(1, Ordering::SeqCst);
        self.one_shot
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Scripted reply of a generator
pub enum Reply {
    Fragments(Vec<&'static str>),
    /// `Heard <last user text>.`
    Echo,
    Fail,
    Hang,
}

fn echo_text(context: &[ContextTurn]) -> String {
    let last = context.last().map(|turn| turn.text.as_str()).unwrap_or_default();
    format!("Heard {last}.")
}

/// Generator that replays one scripted reply per call
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    pub contexts: Mutex<Vec<Vec<ContextTurn>>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<Vec<ContextTurn>> {
        self.contexts.lock().unwrap().clone()
    }

    fn next_reply(&self, context: &[ContextTurn]) -> Reply {
        self.contexts.lock().unwrap().push(context.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fragments(Vec::new()))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream(&self, context: &[ContextTurn]) -> Result<TextStream> {
        match self.next_reply(context) {
            Reply::Fragments(parts) => {
                let items: Vec<Result<String>> = parts.into_iter().map(|p| Ok(p.to_string())).collect();
                Ok(futures::stream::iter(items).boxed())
            }
            Reply::Echo => Ok(futures::stream::iter([Ok(echo_text(context))]).boxed()),
            Reply::Fail => Err(Error::connection("gemini", "connection reset")),
            Reply::Hang => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn generate(&self, context: &[ContextTurn]) -> Result<String> {
        match self.next_reply(context) {
            Reply::Fragments(parts) if parts.concat().trim().is_empty() => Err(Error::EmptyGeneration),
            Reply::Fragments(parts) => Ok(parts.concat()),
            Reply::Echo => Ok(echo_text(context)),
            Reply::Fail | Reply::Hang => Err(Error::connection("gemini", "connection reset")),
        }
    }
}

/// Synthesizer that speaks `text` as two chunks: `<text>` and `|`
#[derive(Default)]
pub struct ScriptedSynthesizer {
    pub texts: Mutex<Vec<String>>,
    fail: bool,
}

impl ScriptedSynthesizer {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn stream(&self, text: &str, _voice: &VoiceSettings) -> Result<AudioStream> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(Error::connection("murf", "handshake rejected"));
        }

        let chunks = vec![Ok(Bytes::from(text.to_string())), Ok(Bytes::from_static(b"|"))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Providers and the pipeline built over them
pub struct Harness {
    pub transcriber: Arc<ScriptedTranscriber>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    #[must_use]
    pub fn new(transcriber: ScriptedTranscriber, generator: ScriptedGenerator, synthesizer: ScriptedSynthesizer) -> Self {
        Self::build(transcriber, generator, synthesizer, None)
    }

    /// Like `new`, with a bound on each streamed fragment or audio chunk
    #[must_use]
    pub fn with_stream_timeout(
        transcriber: ScriptedTranscriber,
        generator: ScriptedGenerator,
        synthesizer: ScriptedSynthesizer,
        limit: Duration,
    ) -> Self {
        Self::build(transcriber, generator, synthesizer, Some(limit))
    }

    fn build(
        transcriber: ScriptedTranscriber,
        generator: ScriptedGenerator,
        synthesizer: ScriptedSynthesizer,
        limit: Option<Duration>,
    ) -> Self {
        let transcriber = Arc::new(transcriber);
        let generator = Arc::new(generator);
        let synthesizer = Arc::new(synthesizer);
        let pipeline = Pipeline::new(
            transcriber.clone(),
            generator.clone(),
            synthesizer.clone(),
            Arc::new(InMemorySessionStore::new()),
        )
        .stream_timeout(limit);

        Self {
            transcriber,
            generator,
            synthesizer,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Router over this harness' pipeline
    #[must_use]
    pub fn router(&self) -> axum::Router {
        ApiServerBuilder::new(Arc::clone(&self.pipeline), 0).build().router()
    }

    /// Serve the router on a local port
    pub async fn serve(&self) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Feed `inputs`, close the input side and run the pipeline to completion
    pub async fn converse(&self, session_id: &str, inputs: Vec<ClientInput>) -> (Result<()>, Vec<ClientEvent>) {
        let (input_tx, input_rx) = mpsc::channel(inputs.len().max(1));
        for input in inputs {
            input_tx.send(input).await.unwrap();
        }
        drop(input_tx);

        let (event_tx, mut event_rx) = mpsc::channel(256);
        let result = self.pipeline.run(session_id, input_rx, event_tx).await;

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        (result, events)
    }
}

/// Audio input frames `a0`, `a1`, ...
#[must_use]
pub fn audio_frames(count: usize) -> Vec<ClientInput> {
    (0..count)
        .map(|i| ClientInput::Audio(Bytes::from(format!("a{i}"))))
        .collect()
}

#[must_use]
pub fn reply(text: &str) -> ClientEvent {
    ClientEvent::Reply {
        text: text.to_string(),
    }
}

/// Audio events the scripted synthesizer produces for `text`
#[must_use]
pub fn spoken(text: &str) -> [ClientEvent; 2] {
    [
        ClientEvent::Audio {
            data: Bytes::from(text.to_string()),
        },
        ClientEvent::Audio {
            data: Bytes::from_static(b"|"),
        },
    ]
}
