//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use jarvis_voice::tools::{ToolArgs, ToolSchema};
use jarvis_voice::voice::{AudioFrame, AudioStream, OutputDevice, PlaybackSink};
use jarvis_voice::{
    Error, Message, ModelClient, Result, SpeechSynthesizer, ToolCallRequest, TurnEvent, TurnId,
};

/// Model that replays canned responses and counts its calls
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<Message>>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<Message>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        })
    }

    /// Model that answers every turn with plain text, in order
    pub fn answers(answers: &[&str]) -> Arc<Self> {
        Self::new(answers.iter().map(|a| Ok(Message::assistant(*a))).collect())
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _history: &[Message], _tools: &[ToolSchema]) -> Result<Message> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Model("script exhausted".to_string())))
    }
}

/// Assistant message requesting one tool call
pub fn tool_call(id: &str, name: &str) -> Message {
    Message::assistant_with_tool_calls("", vec![ToolCallRequest::new(id, name, ToolArgs::new())])
}

/// Frame whose samples all carry `marker`
pub fn marked_frame(seq: u64, marker: i16) -> AudioFrame {
    AudioFrame::from_samples(seq, &[marker; 4])
}

/// Speech fixture: session `n` (1-based) yields `frames` frames marked `n`
///
/// Sessions listed in `stall` then hang instead of finishing.
pub struct ScriptedSpeech {
    frames: usize,
    stall: Vec<i16>,
    sessions: Mutex<i16>,
}

impl ScriptedSpeech {
    pub fn new(frames: usize) -> Arc<Self> {
        Self::stalling(frames, &[])
    }

    pub fn stalling(frames: usize, stall: &[i16]) -> Arc<Self> {
        Arc::new(Self {
            frames,
            stall: stall.to_vec(),
            sessions: Mutex::new(0),
        })
    }

    pub fn sessions(&self) -> i16 {
        *self.sessions.lock().unwrap()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    async fn synthesize(&self, _text: &str) -> AudioStream {
        let marker = {
            let mut sessions = self.sessions.lock().unwrap();
            *sessions += 1;
            *sessions
        };

        let frames: Vec<_> = (0..self.frames as u64)
            .map(|seq| marked_frame(seq, marker))
            .collect();
        let audio = futures::stream::iter(frames);

        if self.stall.contains(&marker) {
            audio.chain(futures::stream::pending()).boxed()
        } else {
            audio.boxed()
        }
    }
}

/// Output device that records the marker of every rendered frame
///
/// Writes block while the gate is closed.
#[derive(Clone)]
pub struct RecordingDevice {
    rendered: Arc<Mutex<Vec<i16>>>,
    open: Arc<AtomicBool>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            rendered: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Device whose writes wait for [`open_gate`](Self::open_gate)
    pub fn gated() -> Self {
        let device = Self::new();
        device.open.store(false, Ordering::SeqCst);
        device
    }

    pub fn open_gate(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn rendered(&self) -> Vec<i16> {
        self.rendered.lock().unwrap().clone()
    }

    /// Playback sink rendering into this device
    pub fn sink(&self) -> Arc<PlaybackSink> {
        let device = self.clone();
        Arc::new(
            PlaybackSink::spawn(move || Ok(Box::new(device.clone()) as Box<dyn OutputDevice>))
                .unwrap(),
        )
    }
}

impl OutputDevice for RecordingDevice {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let marker = frame.samples().next().unwrap_or_default();
        self.rendered.lock().unwrap().push(marker);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handle to an in-process speech service fixture
pub struct SpeechServer {
    pub base_url: String,
    pub received: mpsc::UnboundedReceiver<Vec<String>>,
}

/// How the fixture service ends a session after sending its audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Send an `isFinal` envelope then close cleanly
    Final,
    /// Drop the connection without a closing handshake
    Abort,
    /// Send a frame that is not JSON, then more audio, then close
    Malformed,
    /// Keep the connection open without sending anything else
    Hold,
}

/// Start a websocket speech service fixture on a random local port
///
/// For every session it reads the three protocol frames, replies with one
/// audio envelope per entry of `chunks` and then ends the session.
pub async fn speech_server(chunks: Vec<Vec<i16>>, ending: Ending) -> SpeechServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let chunks = chunks.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                let mut received = Vec::new();
                while received.len() < 3 {
                    match ws.next().await {
                        Some(Ok(WsMessage::Text(text))) => received.push(text),
                        Some(Ok(_)) => {}
                        _ => return,
                    }
                }
                let _ = tx.send(received);

                for chunk in &chunks {
                    ws.send(audio_envelope(chunk)).await.unwrap();
                }

                match ending {
                    Ending::Final => {
                        let done = serde_json::json!({ "isFinal": true });
                        let _ = ws.send(WsMessage::Text(done.to_string())).await;
                        let _ = ws.close(None).await;
                    }
                    Ending::Abort => drop(ws),
                    Ending::Malformed => {
                        let _ = ws.send(WsMessage::Text("not json".to_string())).await;
                        let _ = ws.send(audio_envelope(&[9; 16])).await;
                        let _ = ws.close(None).await;
                    }
                    Ending::Hold => {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                }
            });
        }
    });

    SpeechServer {
        base_url: format!("ws://{addr}"),
        received: rx,
    }
}

/// Audio envelope carrying `samples` as base64 PCM
fn audio_envelope(samples: &[i16]) -> WsMessage {
    use base64::Engine as _;

    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let audio = base64::engine::general_purpose::STANDARD.encode(pcm);
    WsMessage::Text(serde_json::json!({ "audio": audio, "isFinal": null }).to_string())
}

/// Wait for the end of `turn`, returning its final text
pub async fn wait_for_turn_end(
    events: &mut mpsc::UnboundedReceiver<TurnEvent>,
    turn: TurnId,
) -> Option<String> {
    let wait = async {
        let mut text = None;
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::FinalText { turn: t, text: answer } if t == turn => text = Some(answer),
                TurnEvent::TurnEnd { turn: t } if t == turn => return text,
                _ => {}
            }
        }
        text
    };

    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("turn did not end in time")
}

/// Collect events until every turn in `turns` has ended
pub async fn collect_until_ended(
    events: &mut mpsc::UnboundedReceiver<TurnEvent>,
    turns: &[TurnId],
) -> Vec<TurnEvent> {
    let wait = async {
        let mut seen = Vec::new();
        let mut open: Vec<_> = turns.to_vec();
        while !open.is_empty() {
            let Some(event) = events.recv().await else { break };
            if let TurnEvent::TurnEnd { turn } = event {
                open.retain(|&t| t != turn);
            }
            seen.push(event);
        }
        seen
    };

    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("turns did not end in time")
}

/// Final text reported for `turn`
pub fn final_text(events: &[TurnEvent], turn: TurnId) -> Option<&str> {
    events.iter().find_map(|event| match event {
        TurnEvent::FinalText { turn: t, text } if *t == turn => Some(text.as_str()),
        _ => None,
    })
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
