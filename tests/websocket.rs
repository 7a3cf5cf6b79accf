//! `/ws/voice` integration tests over a real socket

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use voice_relay::voice::TranscriptEvent;

mod common;
use common::{Harness, Reply, ScriptedGenerator, ScriptedSynthesizer, ScriptedTranscriber};

fn conversation() -> Harness {
    Harness::new(
        ScriptedTranscriber::streaming(vec![
            Ok(TranscriptEvent::Partial("hel".to_string())),
            Ok(TranscriptEvent::Final("Hello".to_string())),
        ]),
        ScriptedGenerator::new(vec![Reply::Fragments(vec!["Hi", " there."])]),
        ScriptedSynthesizer::default(),
    )
}

/// Frames in a comparable form: text frames as JSON, binary frames as `{"binary": <utf8>}`
fn frame(msg: Message) -> Value {
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        Message::Binary(data) => json!({ "binary": String::from_utf8_lossy(&data) }),
        other => panic!("unexpected frame {other:?}"),
    }
}

/// Connect, send `audio` then the end sentinel, and collect frames until close
async fn exchange(addr: SocketAddr, query: &str, audio: &[&'static str]) -> Vec<Value> {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/voice{query}"))
        .await
        .unwrap();

    for chunk in audio.iter().copied() {
        ws.send(Message::binary(chunk.as_bytes())).await.unwrap();
    }
    ws.send(Message::text("__END__")).await.unwrap();

    let collect = async {
        let mut frames = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg.unwrap() {
                Message::Close(_) => break,
                msg => frames.push(frame(msg)),
            }
        }
        frames
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("socket was not closed after the reply")
}

fn reply_events(audio: impl Fn(&str) -> Value) -> Vec<Value> {
    vec![
        json!({ "type": "partial-transcript", "text": "hel" }),
        json!({ "type": "final-transcript", "text": "Hello" }),
        json!({ "type": "gemini", "text": "Hi" }),
        audio("Hi"),
        audio("|"),
        json!({ "type": "gemini", "text": " there." }),
        audio(" there."),
        audio("|"),
    ]
}

#[tokio::test]
async fn test_binary_audio_conversation() {
    let harness = conversation();
    let addr = harness.serve().await;

    let frames = exchange(addr, "?session_id=abc", &["a0", "a1", "a2"]).await;

    assert_eq!(frames[0], json!({ "type": "connected", "session_id": "abc" }));
    assert_eq!(frames[1..], reply_events(|text| json!({ "binary": text }))[..]);

    let received: Vec<String> = harness
        .transcriber
        .received()
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();
    assert_eq!(received, ["a0", "a1", "a2"]);
    assert_eq!(harness.pipeline.sessions().get("abc").len(), 2);
}

#[tokio::test]
async fn test_base64_audio_conversation() {
    let harness = conversation();
    let addr = harness.serve().await;

    let frames = exchange(addr, "?session_id=b64&audio=base64", &["a0"]).await;

    let base64 = |text: &str| json!({ "type": "audio", "data": voice_relay::voice::encode_audio(text.as_bytes()) });
    assert_eq!(frames[0]["type"], "connected");
    assert_eq!(frames[1..], reply_events(base64)[..]);
}

#[tokio::test]
async fn test_session_id_generated_when_absent() {
    let harness = conversation();
    let addr = harness.serve().await;

    let frames = exchange(addr, "", &["a0"]).await;

    assert_eq!(frames[0]["type"], "connected");
    let session_id = frames[0]["session_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(session_id).is_ok());

    // The conversation is recorded under the generated id
    let history = harness.pipeline.sessions().get(session_id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "Hi there.");
}

#[tokio::test]
async fn test_provider_failure_reported_before_close() {
    let harness = Harness::new(
        ScriptedTranscriber::streaming(vec![Err(voice_relay::Error::connection(
            "assemblyai",
            "provider disconnected",
        ))]),
        ScriptedGenerator::default(),
        ScriptedSynthesizer::default(),
    );
    let addr = harness.serve().await;

    let frames = exchange(addr, "?session_id=err", &["a0"]).await;

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1]["type"], "error");
    assert_eq!(frames[1]["code"], "provider_connection_error");
}
