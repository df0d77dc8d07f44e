//! Configuration management for the Jarvis voice assistant
//!
//! Sources, lowest to highest priority: built-in defaults, the TOML file
//! (see [`file::config_file_path`]), a `.env` file in the working
//! directory, the process environment, and command-line overrides.

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::agent::HistoryPolicy;
use crate::voice::{OutputTarget, VoiceSettings};
use crate::{Error, Result};

use file::JarvisConfigFile;

/// Default assistant name
pub const DEFAULT_ASSISTANT_NAME: &str = "Jarvis";

/// Default timezone for the date tool
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Jakarta;

/// Default Gemini model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";

/// Default model for OpenAI-compatible gateways
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Default ElevenLabs voice
pub const DEFAULT_VOICE_ID: &str = "SnAS1AhU43gJHbuUJIdM";

/// Default ElevenLabs model
pub const DEFAULT_TTS_MODEL: &str = "eleven_turbo_v2";

/// PCM output format matching [`crate::voice::SAMPLE_RATE`]
pub const DEFAULT_OUTPUT_FORMAT: &str = "pcm_24000";

/// Jarvis configuration
#[derive(Debug)]
pub struct Config {
    /// Persona and conversation behavior
    pub assistant: AssistantConfig,

    /// Language model backend
    pub llm: LlmConfig,

    /// Speech synthesis service
    pub speech: SpeechConfig,

    /// Queue and shutdown tuning
    pub pipeline: PipelineConfig,

    /// Speak answers aloud
    pub voice_enabled: bool,

    /// Record speech to a WAV file instead of the speaker
    pub output_wav: Option<PathBuf>,
}

/// Persona and conversation behavior
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Name used in the prompt and the CLI
    pub name: String,

    /// System prompt seeded as the first history message
    pub system_prompt: String,

    /// Timezone used by the date tool
    pub timezone: Tz,

    /// Turns kept in history; `None` keeps everything
    pub history_limit: Option<usize>,
}

impl AssistantConfig {
    /// History policy derived from the turn limit
    #[must_use]
    pub fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::from_limit(self.history_limit)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_ASSISTANT_NAME.to_string(),
            system_prompt: default_system_prompt(DEFAULT_ASSISTANT_NAME),
            timezone: DEFAULT_TIMEZONE,
            history_limit: None,
        }
    }
}

/// Default persona prompt for an assistant called `name`
#[must_use]
pub fn default_system_prompt(name: &str) -> String {
    format!(
        "Your name is {name}. You have a joking sarcastic personality and are an AI designed \
         to help me with technical knowledge as well as day to day tasks. Address me as Sir \
         and speak in a British accent. Also keep replies short.\n\
         Tool use:\n\
         - If the user asks for today's date (or current date), call get_today_date."
    )
}

/// Supported model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmBackend {
    /// Native Gemini API
    #[default]
    Gemini,
    /// OpenAI-compatible chat completions
    OpenAi,
}

impl LlmBackend {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }

    /// Environment variable holding this backend's API key
    #[must_use]
    pub const fn key_var(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!(
                "unknown LLM backend: {other} (expected gemini or openai)"
            ))),
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Language model configuration
#[derive(Debug, Default)]
pub struct LlmConfig {
    /// Which backend to talk to
    pub backend: LlmBackend,

    /// Model identifier
    pub model: String,

    /// Backend API key
    pub api_key: Option<SecretString>,

    /// API base URL override
    pub base_url: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Ask the model to skip its thinking phase (Gemini only)
    pub disable_thinking: bool,
}

/// Speech synthesis configuration
#[derive(Debug)]
pub struct SpeechConfig {
    /// ElevenLabs API key
    pub api_key: Option<SecretString>,

    /// Websocket base URL override
    pub base_url: Option<String>,

    /// Voice identifier
    pub voice_id: String,

    /// TTS model identifier
    pub model_id: String,

    /// Requested audio format
    pub output_format: String,

    /// Voice parameters sent when a session opens
    pub voice_settings: VoiceSettings,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model_id: DEFAULT_TTS_MODEL.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            voice_settings: VoiceSettings::default(),
        }
    }
}

/// Queue and shutdown tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Pending submissions before `submit` reports busy
    pub queue_capacity: usize,

    /// Longest wait for workers during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Command-line overrides, applied last
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Backend from `--backend`
    pub backend: Option<LlmBackend>,

    /// Model from `--model`
    pub model: Option<String>,

    /// `--no-voice`
    pub disable_voice: bool,

    /// `--output-wav`
    pub output_wav: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed (unknown backend, invalid
    /// timezone, non-numeric limit)
    pub fn load(overrides: &Overrides) -> Result<Self> {
        // .env fills in variables that are not already set
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }

        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok(), overrides)
    }

    /// Merge a parsed config file, an environment lookup and overrides
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed
    pub fn resolve<F>(fc: JarvisConfigFile, env: F, overrides: &Overrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // Backend (cli > env > toml > default)
        let backend = match overrides.backend {
            Some(backend) => backend,
            None => env("JARVIS_LLM_BACKEND")
                .or(fc.llm.backend)
                .map(|s| s.parse::<LlmBackend>())
                .transpose()?
                .unwrap_or_default(),
        };

        let api_key = env(backend.key_var())
            .or(match backend {
                LlmBackend::Gemini => fc.api_keys.gemini,
                LlmBackend::OpenAi => fc.api_keys.openai,
            })
            .map(SecretString::from);

        let llm = LlmConfig {
            backend,
            model: overrides
                .model
                .clone()
                .or_else(|| env("JARVIS_LLM_MODEL"))
                .or(fc.llm.model)
                .unwrap_or_else(|| backend.default_model().to_string()),
            api_key,
            base_url: env("JARVIS_LLM_BASE_URL").or(fc.llm.base_url),
            temperature: fc.llm.temperature.unwrap_or(0.7),
            disable_thinking: true,
        };

        // Speech (env > toml > default)
        let defaults = VoiceSettings::default();
        let speech = SpeechConfig {
            api_key: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
            base_url: fc.voice.base_url,
            voice_id: env("JARVIS_VOICE_ID")
                .or(fc.voice.voice_id)
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model_id: env("JARVIS_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            voice_settings: VoiceSettings {
                stability: fc.voice.stability.unwrap_or(defaults.stability),
                similarity_boost: fc.voice.similarity_boost.unwrap_or(defaults.similarity_boost),
            },
        };

        let voice_disabled = overrides.disable_voice
            || env("JARVIS_DISABLE_VOICE").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let voice_enabled = !voice_disabled && fc.voice.enabled.unwrap_or(true);

        // Assistant (env > toml > default)
        let name = fc
            .assistant
            .name
            .unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string());
        let system_prompt = fc
            .assistant
            .system_prompt
            .unwrap_or_else(|| default_system_prompt(&name));

        let timezone = match env("JARVIS_TIMEZONE").or(fc.assistant.timezone) {
            Some(tz) => tz
                .parse::<Tz>()
                .map_err(|e| Error::Config(format!("invalid timezone {tz}: {e}")))?,
            None => DEFAULT_TIMEZONE,
        };

        let history_limit = match env("JARVIS_HISTORY_LIMIT") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                Error::Config(format!("invalid JARVIS_HISTORY_LIMIT {raw}: {e}"))
            })?),
            None => fc.assistant.history_limit,
        }
        .filter(|&n| n > 0);

        let assistant = AssistantConfig {
            name,
            system_prompt,
            timezone,
            history_limit,
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            queue_capacity: fc
                .pipeline
                .queue_capacity
                .filter(|&n| n > 0)
                .unwrap_or(defaults.queue_capacity),
            shutdown_timeout: fc
                .pipeline
                .shutdown_timeout_secs
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
        };

        if voice_disabled {
            tracing::info!("voice output disabled");
        }

        Ok(Self {
            assistant,
            llm,
            speech,
            pipeline,
            voice_enabled,
            output_wav: overrides.output_wav.clone().or(fc.voice.output_wav),
        })
    }

    /// Check that the credentials needed for a full conversation exist
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the backend key is missing, or the
    /// ElevenLabs key is missing while voice is enabled
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_none() {
            return Err(Error::Config(format!(
                "{} is required for the {} backend",
                self.llm.backend.key_var(),
                self.llm.backend
            )));
        }

        if self.voice_enabled && self.speech.api_key.is_none() {
            return Err(Error::Config(
                "ELEVENLABS_API_KEY is required when voice is enabled (or pass --no-voice)"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Where synthesized speech should go
    #[must_use]
    pub fn output_target(&self) -> OutputTarget {
        match (&self.output_wav, self.voice_enabled) {
            (_, false) => OutputTarget::Null,
            (Some(path), true) => OutputTarget::Wav(path.clone()),
            (None, true) => OutputTarget::Speaker,
        }
    }
}
