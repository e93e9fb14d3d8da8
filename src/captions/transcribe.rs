//! Tier 3: synthesize captions with a local speech recognizer.
//!
//! The video is never downloaded in full: yt-dlp resolves a direct audio
//! stream URL, ffmpeg pulls just the audio into a recognizer-friendly WAV,
//! and the whisper CLI produces timestamped JSON. All scratch files live in
//! a request-owned temp directory that is removed on exit, success or not.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::CaptionSegment;
use crate::config::{ResolverConfig, TranscriptionConfig};
use crate::stream::StreamResolver;

/// Whisper CLI JSON output shape.
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    timestamps: WhisperTimestamps,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperTimestamps {
    from: String,
    to: String,
}

/// Local speech-to-text transcriber used as the caption chain's last resort.
pub struct Transcriber {
    config: TranscriptionConfig,
    resolver: StreamResolver,
    ffmpeg_bin: String,
}

impl Transcriber {
    pub fn new(config: TranscriptionConfig, resolver_config: ResolverConfig) -> Self {
        let ffmpeg_bin = resolver_config.ffmpeg_bin.clone();
        Self {
            config,
            resolver: StreamResolver::new(resolver_config),
            ffmpeg_bin,
        }
    }

    /// Transcribe a video's audio into caption segments. Unlike tiers 1–2,
    /// an empty result here is a hard error: there is no further fallback.
    pub async fn transcribe(&self, video_id: &str) -> Result<Vec<CaptionSegment>> {
        let audio_url = self.resolver.resolve_audio_url(video_id).await?;

        let temp_dir = tempfile::tempdir()?;
        let wav_path = temp_dir.path().join("audio.wav");

        info!("Extracting audio for transcription: {}", video_id);
        self.extract_audio(&audio_url, &wav_path).await?;

        info!("Running speech recognizer on {}", wav_path.display());
        let segments = self.run_whisper(&wav_path, temp_dir.path()).await?;

        if segments.is_empty() {
            return Err(anyhow!(
                "speech recognizer produced no usable output for {}",
                video_id
            ));
        }

        Ok(segments)
        // temp_dir drops here and removes the scratch files
    }

    /// Pull just the audio from the remote stream into a 16 kHz mono WAV.
    async fn extract_audio(&self, audio_url: &str, wav_path: &Path) -> Result<()> {
        let status = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            Command::new(&self.ffmpeg_bin)
                .args([
                    "-y",
                    "-i",
                    audio_url,
                    "-vn",
                    "-acodec",
                    "pcm_s16le",
                    "-ar",
                    "16000",
                    "-ac",
                    "1",
                ])
                .arg(wav_path)
                .status(),
        )
        .await
        .map_err(|_| anyhow!("audio extraction timed out after {}s", self.config.timeout_secs))??;

        if !status.success() {
            return Err(anyhow!("audio extraction failed with {}", status));
        }
        Ok(())
    }

    async fn run_whisper(&self, wav_path: &Path, work_dir: &Path) -> Result<Vec<CaptionSegment>> {
        let output_base = work_dir.join("audio");

        let mut cmd = Command::new(&self.config.whisper_bin);
        cmd.arg("-f")
            .arg(wav_path)
            .arg("-oj")
            .arg("-of")
            .arg(&output_base)
            .arg("-m")
            .arg(&self.config.model_path);
        if let Some(language) = &self.config.language {
            cmd.arg("-l").arg(language);
        }

        debug!("Executing recognizer: {:?}", cmd);
        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow!("transcription timed out after {}s", self.config.timeout_secs))??;

        if !output.status.success() {
            return Err(anyhow!(
                "recognizer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let json_path = output_base.with_extension("json");
        let json_content = tokio::fs::read_to_string(&json_path).await?;
        parse_whisper_output(&json_content)
    }
}

/// Parse the recognizer's JSON into caption segments.
fn parse_whisper_output(json_content: &str) -> Result<Vec<CaptionSegment>> {
    let output: WhisperOutput = serde_json::from_str(json_content)?;

    let mut segments = Vec::with_capacity(output.transcription.len());
    for seg in output.transcription {
        let text = seg.text.trim().to_string();
        if text.is_empty() {
            continue;
        }

        let start = parse_clock_stamp(&seg.timestamps.from)?;
        let end = parse_clock_stamp(&seg.timestamps.to)?;

        segments.push(CaptionSegment {
            start,
            dur: (end - start).max(0.0),
            text,
        });
    }

    Ok(segments)
}

/// Convert a `HH:MM:SS,mmm` (or `.mmm`) clock stamp to seconds, floored at
/// millisecond precision. The same rounding rule applies wherever clock
/// stamps enter the system.
fn parse_clock_stamp(stamp: &str) -> Result<f64> {
    let stamp = stamp.trim();
    let (clock, fraction) = match stamp.split_once([',', '.']) {
        Some((clock, fraction)) => (clock, fraction),
        None => (stamp, ""),
    };

    let mut total_seconds: u64 = 0;
    for part in clock.split(':') {
        let value: u64 = part
            .parse()
            .map_err(|_| anyhow!("invalid clock stamp: {}", stamp))?;
        total_seconds = total_seconds * 60 + value;
    }

    let millis: u64 = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().take(3).collect();
        let value: u64 = digits
            .parse()
            .map_err(|_| anyhow!("invalid clock stamp: {}", stamp))?;
        value * 10u64.pow(3 - digits.len() as u32)
    };

    Ok((total_seconds * 1000 + millis) as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_stamp() {
        assert_eq!(parse_clock_stamp("00:00:00,000").unwrap(), 0.0);
        assert_eq!(parse_clock_stamp("00:01:23,456").unwrap(), 83.456);
        assert_eq!(parse_clock_stamp("01:00:00,000").unwrap(), 3600.0);
        // Dot separator and short fractions
        assert_eq!(parse_clock_stamp("00:00:01.5").unwrap(), 1.5);
        // Minutes-only form
        assert_eq!(parse_clock_stamp("01:05").unwrap(), 65.0);
        // Sub-millisecond precision is floored away upstream of us
        assert_eq!(parse_clock_stamp("00:00:00,0079").unwrap(), 0.007);
    }

    #[test]
    fn test_parse_clock_stamp_rejects_garbage() {
        assert!(parse_clock_stamp("abc").is_err());
        assert!(parse_clock_stamp("1:xx:00").is_err());
    }

    #[test]
    fn test_parse_whisper_output() {
        let json = r#"{
            "systeminfo": "ignored",
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"}, "text": " Hello there."},
                {"timestamps": {"from": "00:00:02,500", "to": "00:00:02,500"}, "text": " Beat."},
                {"timestamps": {"from": "00:00:03,000", "to": "00:00:05,000"}, "text": "   "}
            ],
            "result": {"language": "en"}
        }"#;

        let segments = parse_whisper_output(json).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello there.");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].dur, 2.5);
        // Zero-duration segments are preserved
        assert_eq!(segments[1].dur, 0.0);
    }

    #[test]
    fn test_parse_whisper_output_empty() {
        let segments = parse_whisper_output(r#"{"transcription": []}"#).unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_transcribe_fails_without_resolver() {
        let transcriber = Transcriber::new(
            TranscriptionConfig {
                whisper_bin: "false".to_string(),
                ..TranscriptionConfig::default()
            },
            ResolverConfig {
                ytdlp_bin: "false".to_string(),
                ffmpeg_bin: "false".to_string(),
                ..ResolverConfig::default()
            },
        );
        assert!(transcriber.transcribe("dQw4w9WgXcQ").await.is_err());
    }
}
