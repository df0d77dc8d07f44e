//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JarvisConfigFile {
    /// Assistant persona and behavior
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis and playback configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineFileConfig,
}

/// Assistant persona configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Display name (e.g. "Jarvis")
    pub name: Option<String>,

    /// Replacement system prompt
    pub system_prompt: Option<String>,

    /// IANA timezone for the date tool (e.g. "Asia/Jakarta")
    pub timezone: Option<String>,

    /// Number of turns kept in history (0 = unbounded)
    pub history_limit: Option<usize>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Backend ("gemini" or "openai")
    pub backend: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-lite")
    pub model: Option<String>,

    /// API base URL override
    pub base_url: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Voice configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable spoken output
    pub enabled: Option<bool>,

    /// ElevenLabs voice identifier
    pub voice_id: Option<String>,

    /// ElevenLabs model (e.g. "eleven_turbo_v2")
    pub tts_model: Option<String>,

    /// Websocket base URL override
    pub base_url: Option<String>,

    /// Voice stability (0.0 to 1.0)
    pub stability: Option<f32>,

    /// Similarity boost (0.0 to 1.0)
    pub similarity_boost: Option<f32>,

    /// Record speech to this WAV file instead of the speaker
    pub output_wav: Option<PathBuf>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Pipeline tuning
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Pending submissions before `submit` reports busy
    pub queue_capacity: Option<usize>,

    /// Seconds to wait for workers on shutdown
    pub shutdown_timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    let Some(path) = config_file_path() else {
        return JarvisConfigFile::default();
    };

    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<JarvisConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/jarvis/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[llm]
backend = "openai"
model = "gpt-4o-mini"

[voice]
enabled = false
stability = 0.3

[assistant]
history_limit = 10
"#,
        )
        .unwrap();

        let file = read_config_file(&path).unwrap();
        assert_eq!(file.llm.backend.as_deref(), Some("openai"));
        assert_eq!(file.voice.enabled, Some(false));
        assert_eq!(file.voice.stability, Some(0.3));
        assert_eq!(file.assistant.history_limit, Some(10));
        assert!(file.api_keys.gemini.is_none());
    }

    #[test]
    fn rejects_unknown_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channels]\ndiscord = true\n").unwrap();

        assert!(read_config_file(&path).is_err());
    }
}
