//! Streaming text-to-speech over the ElevenLabs websocket protocol
//!
//! One session per turn: connect, send the voice settings, send the whole
//! answer, send the end-of-input marker, and read audio frames until the
//! service says it is done. Speech is best effort; any connection or decode
//! failure simply ends the stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use super::AudioFrame;
use crate::config::SpeechConfig;
use crate::{Error, Result};

/// Default ElevenLabs websocket endpoint
const DEFAULT_BASE_URL: &str = "wss://api.elevenlabs.io";

/// Frames buffered between the socket reader and the consumer
const FRAME_BUFFER: usize = 32;

/// Longest silence from the service before a session is abandoned
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Audio produced by one speech session, in production order
pub type AudioStream = BoxStream<'static, AudioFrame>;

/// Converts text into streamed audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Open a fresh session for `text`
    ///
    /// The stream is finite and ends early, without error, if the session
    /// fails. Dropping it closes the session.
    async fn synthesize(&self, text: &str) -> AudioStream;
}

/// Voice parameters sent when a session opens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    /// Voice stability (0.0 to 1.0)
    pub stability: f32,

    /// Similarity boost (0.0 to 1.0)
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.8,
        }
    }
}

struct SessionParams {
    endpoint: Url,
    api_key: SecretString,
    voice: VoiceSettings,
    idle_timeout: Duration,
}

/// ElevenLabs `stream-input` websocket client
pub struct SpeechStreamer {
    params: Arc<SessionParams>,
}

impl SpeechStreamer {
    /// Create a streamer from speech configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the endpoint is invalid
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let api_key = config.api_key.ok_or_else(|| {
            Error::Config("ELEVENLABS_API_KEY required when voice is enabled".to_string())
        })?;

        let endpoint = stream_endpoint(
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &config.voice_id,
            &config.model_id,
            &config.output_format,
        )?;

        tracing::debug!(endpoint = %endpoint, "speech streamer configured");

        Ok(Self {
            params: Arc::new(SessionParams {
                endpoint,
                api_key,
                voice: config.voice_settings,
                idle_timeout: SESSION_IDLE_TIMEOUT,
            }),
        })
    }

    /// Set how long a session may wait for the next service message
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        if let Some(params) = Arc::get_mut(&mut self.params) {
            params.idle_timeout = idle_timeout;
        }
        self
    }

    /// Websocket endpoint used for every session
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.params.endpoint
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechStreamer {
    async fn synthesize(&self, text: &str) -> AudioStream {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let params = Arc::clone(&self.params);
        let text = text.to_string();

        tokio::spawn(async move {
            match run_session(&params, &text, tx).await {
                Ok(frames) => tracing::debug!(frames, "speech session finished"),
                Err(e) => tracing::warn!(error = %e, "speech session ended early"),
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

/// Build the `stream-input` URL for a voice
///
/// # Errors
///
/// Returns error if the base URL is not a valid URL
pub fn stream_endpoint(
    base_url: &str,
    voice_id: &str,
    model_id: &str,
    output_format: &str,
) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .and_then(|base| base.join(&format!("v1/text-to-speech/{voice_id}/stream-input")))
        .map_err(|e| Error::Config(format!("invalid TTS endpoint {base_url}: {e}")))?;

    url.query_pairs_mut()
        .append_pair("model_id", model_id)
        .append_pair("output_format", output_format);

    Ok(url)
}

/// Session-initialization frame: voice settings and credentials
#[must_use]
pub fn init_message(voice: VoiceSettings, api_key: &str) -> String {
    serde_json::json!({
        "text": " ",
        "voice_settings": {
            "stability": voice.stability,
            "similarity_boost": voice.similarity_boost,
        },
        "xi_api_key": api_key,
    })
    .to_string()
}

/// Frame carrying the text to speak
#[must_use]
pub fn text_message(text: &str) -> String {
    // Trailing space tells the service the last word is complete
    serde_json::json!({ "text": format!("{text} ") }).to_string()
}

/// End-of-input marker
#[must_use]
pub fn end_of_input_message() -> String {
    serde_json::json!({ "text": "" }).to_string()
}

/// What one inbound frame meant
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Decoded audio
    Audio(AudioFrame),
    /// The service finished this session
    Final,
    /// Nothing to act on (alignment data, empty audio, ...)
    Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes inbound control envelopes into sample-aligned audio frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    next_seq: u64,
    carry: Option<u8>,
}

impl FrameDecoder {
    /// Create a decoder for a new session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a valid envelope, carries invalid
    /// base64, or reports a service error
    pub fn decode(&mut self, raw: &str) -> Result<Inbound> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| Error::Tts(format!("malformed frame: {e}")))?;

        if let Some(error) = envelope.error {
            let detail = envelope.message.unwrap_or_default();
            return Err(Error::Tts(format!("service error {error}: {detail}")));
        }

        if let Some(audio) = envelope.audio.filter(|a| !a.is_empty()) {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(audio)
                .map_err(|e| Error::Tts(format!("invalid audio payload: {e}")))?;
            return Ok(self.frame(bytes));
        }

        if envelope.is_final == Some(true) {
            return Ok(Inbound::Final);
        }

        Ok(Inbound::Ignored)
    }

    /// Split raw bytes on sample boundaries, carrying an odd byte forward
    fn frame(&mut self, bytes: Vec<u8>) -> Inbound {
        let mut pcm = Vec::with_capacity(bytes.len() + 1);
        pcm.extend(self.carry.take());
        pcm.extend(bytes);
        if pcm.len() % 2 == 1 {
            self.carry = pcm.pop();
        }

        if pcm.is_empty() {
            return Inbound::Ignored;
        }

        let frame = AudioFrame::new(self.next_seq, pcm);
        self.next_seq += 1;
        Inbound::Audio(frame)
    }
}

/// Run one session, forwarding frames to `tx`; returns the frame count
async fn run_session(
    params: &SessionParams,
    text: &str,
    tx: mpsc::Sender<AudioFrame>,
) -> Result<u64> {
    let (socket, _) = tokio_tungstenite::connect_async(params.endpoint.as_str()).await?;
    tracing::debug!("speech session connected");

    let (mut sink, mut source) = socket.split();

    let send = async {
        sink.send(WsMessage::Text(init_message(
            params.voice,
            params.api_key.expose_secret(),
        )))
        .await?;
        sink.send(WsMessage::Text(text_message(text))).await?;
        sink.send(WsMessage::Text(end_of_input_message())).await?;
        Ok::<_, Error>(())
    };

    let receive = async {
        let mut decoder = FrameDecoder::new();
        let mut frames = 0u64;
        loop {
            let Ok(next) = tokio::time::timeout(params.idle_timeout, source.next()).await else {
                return Err(Error::Tts(format!(
                    "no message from speech service for {:?}",
                    params.idle_timeout
                )));
            };
            let Some(message) = next else { break };
            let raw = match message? {
                WsMessage::Text(raw) => raw,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            match decoder.decode(&raw)? {
                Inbound::Audio(frame) => {
                    if tx.send(frame).await.is_err() {
                        tracing::debug!("speech consumer gone, closing session");
                        break;
                    }
                    frames += 1;
                }
                Inbound::Final => break,
                Inbound::Ignored => {}
            }
        }
        Ok::<_, Error>(frames)
    };

    let (sent, received) = tokio::join!(send, receive);
    if let Err(e) = sent {
        tracing::warn!(error = %e, "failed to send text to speech service");
    }
    let _ = sink.close().await;

    received
}
