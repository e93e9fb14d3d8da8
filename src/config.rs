use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::LLMProvider;

/// Configuration for the summarizer service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Caption acquisition settings
    pub captions: CaptionConfig,

    /// Tier-3 local transcription settings
    pub transcription: TranscriptionConfig,

    /// Stream/metadata resolver settings
    pub resolver: ResolverConfig,

    /// Key-frame extraction settings
    pub frames: FrameConfig,

    /// Summarization orchestrator settings
    pub summarizer: SummarizerConfig,

    /// LLM endpoint settings
    pub llm: LLMConfig,

    /// Persistent storage settings
    pub storage: StorageConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Timeout for native caption requests (seconds)
    pub request_timeout_secs: u64,

    /// Caption track language preference order
    pub preferred_languages: Vec<String>,

    /// Helper command for the tier-2 fallback; invoked with the video ID as
    /// its single extra argument, stdout must be a JSON array of
    /// `{start, dur, text}`
    pub helper_command: Vec<String>,

    /// Timeout for the helper subprocess (seconds)
    pub helper_timeout_secs: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            preferred_languages: vec!["en".to_string(), "zh".to_string()],
            helper_command: vec![
                "python3".to_string(),
                "scripts/fetch_captions.py".to_string(),
            ],
            helper_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whisper CLI binary
    pub whisper_bin: String,

    /// Path to the ggml model file
    pub model_path: PathBuf,

    /// Language hint for the recognizer
    pub language: Option<String>,

    /// Timeout for audio download + transcription (seconds). This is the
    /// slow path; minutes, not seconds.
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            whisper_bin: "whisper-cli".to_string(),
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: None,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// yt-dlp binary used for stream URLs and video metadata
    pub ytdlp_bin: String,

    /// ffmpeg binary used for audio extraction and frame grabs
    pub ffmpeg_bin: String,

    /// Timeout for metadata and URL resolution calls (seconds)
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Minimum spacing between extracted frames (seconds)
    pub dedup_threshold_secs: u32,

    /// Maximum frames per video
    pub max_frames: usize,

    /// Resolution cap for the frame-grab stream
    pub max_height: u32,

    /// Timeout per frame grab (seconds)
    pub grab_timeout_secs: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            dedup_threshold_secs: 5,
            max_frames: 15,
            max_height: 720,
            grab_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Transcript prefix length sent to the LLM (characters)
    pub max_transcript_chars: usize,

    /// Number of evenly spaced caption timestamps offered as anchors
    pub anchor_samples: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_transcript_chars: 24_000,
            anchor_samples: 40,
        }
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for video records, tags, and frame images
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            captions: CaptionConfig::default(),
            transcription: TranscriptionConfig::default(),
            resolver: ResolverConfig::default(),
            frames: FrameConfig::default(),
            summarizer: SummarizerConfig::default(),
            llm: LLMConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, with the API key overridable
    /// through the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from the given path if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {}, using defaults: {}",
                    path.as_ref().display(),
                    e
                );
                let mut config = Config::default();
                config.apply_env();
                config
            }
        }
    }

    fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            if let Ok(key) = std::env::var("YT_DIGEST_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
            {
                if !key.trim().is_empty() {
                    self.llm.api_key = Some(key.trim().to_string());
                }
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.frames.max_frames == 0 {
            return Err(anyhow!("frames.max_frames must be at least 1"));
        }
        if self.captions.helper_command.is_empty() {
            return Err(anyhow!("captions.helper_command must not be empty"));
        }
        if self.summarizer.max_transcript_chars < 1000 {
            return Err(anyhow!("summarizer.max_transcript_chars is too small"));
        }
        if self.captions.preferred_languages.is_empty() {
            return Err(anyhow!("captions.preferred_languages must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames.dedup_threshold_secs, 5);
        assert_eq!(config.frames.max_frames, 15);
        assert_eq!(config.captions.request_timeout_secs, 30);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.frames.max_frames, config.frames.max_frames);
        assert_eq!(parsed.server.port, config.server.port);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str("[frames]\nmax_frames = 8\n").unwrap();
        assert_eq!(parsed.frames.max_frames, 8);
        // Untouched sections fall back to defaults
        assert_eq!(parsed.frames.dedup_threshold_secs, 5);
        assert_eq!(parsed.captions.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.frames.max_frames = 0;
        assert!(config.validate().is_err());
    }
}
