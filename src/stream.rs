//! Stream and metadata resolution through yt-dlp.
//!
//! Everything here resolves references to remote media without downloading
//! it: direct seekable URLs for frame grabs and audio transcription, and the
//! platform metadata document (title, thumbnail, chapters).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::video_id;

/// A named time range defined by the content creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// Start in seconds
    pub start: f64,
    /// End in seconds
    pub end: f64,
}

/// Platform metadata for a video.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMeta {
    pub title: String,
    pub thumbnail: Option<String>,
    pub chapters: Vec<Chapter>,
}

/// Resolves direct media URLs and video metadata via yt-dlp.
#[derive(Debug, Clone)]
pub struct StreamResolver {
    config: ResolverConfig,
}

impl StreamResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Direct, time-seekable video stream URL capped at `max_height`, for
    /// frame grabbing. Empty resolver output is a failure.
    pub async fn resolve_stream_url(&self, video_id: &str, max_height: u32) -> Result<String> {
        let format = format!(
            "best[height<={h}][ext=mp4]/best[height<={h}]/best",
            h = max_height
        );
        let url = video_id::watch_url(video_id);
        let stdout = self
            .run_ytdlp(&["-g", "-f", &format, "--no-warnings", &url])
            .await?;

        let direct = stdout.lines().next().unwrap_or("").trim();
        if direct.is_empty() {
            return Err(anyhow!("Stream resolver returned no URL for {}", video_id));
        }
        Ok(direct.to_string())
    }

    /// Direct audio-only stream URL for transcription.
    pub async fn resolve_audio_url(&self, video_id: &str) -> Result<String> {
        let url = video_id::watch_url(video_id);
        let stdout = self
            .run_ytdlp(&["-g", "-f", "bestaudio/best", "--no-warnings", &url])
            .await?;

        let direct = stdout.lines().next().unwrap_or("").trim();
        if direct.is_empty() {
            return Err(anyhow!("No audio stream URL for {}", video_id));
        }
        Ok(direct.to_string())
    }

    /// Title, thumbnail, and chapters from the platform metadata document.
    pub async fn fetch_metadata(&self, video_id: &str) -> Result<VideoMeta> {
        let url = video_id::watch_url(video_id);
        let stdout = self
            .run_ytdlp(&["-J", "--no-warnings", "--skip-download", &url])
            .await?;

        let json: serde_json::Value = serde_json::from_str(stdout.trim())?;
        Ok(parse_metadata(&json))
    }

    async fn run_ytdlp(&self, args: &[&str]) -> Result<String> {
        debug!("Running {} {:?}", self.config.ytdlp_bin, args);
        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            Command::new(&self.config.ytdlp_bin).args(args).output(),
        )
        .await
        .map_err(|_| anyhow!("{} timed out after {}s", self.config.ytdlp_bin, self.config.timeout_secs))??;

        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.config.ytdlp_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse the yt-dlp metadata document. Chapters come from the `chapters`
/// array (`start_time`, `end_time`, `title`); videos without chapters yield
/// an empty list.
fn parse_metadata(json: &serde_json::Value) -> VideoMeta {
    let title = json
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let thumbnail = json
        .get("thumbnail")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut chapters = Vec::new();
    if let Some(entries) = json.get("chapters").and_then(|v| v.as_array()) {
        for entry in entries {
            let start = entry.get("start_time").and_then(|v| v.as_f64());
            let end = entry.get("end_time").and_then(|v| v.as_f64());
            let title = entry
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            if let (Some(start), Some(end)) = (start, end) {
                chapters.push(Chapter { title, start, end });
            }
        }
    }

    VideoMeta {
        title,
        thumbnail,
        chapters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metadata_with_chapters() {
        let doc = json!({
            "title": "Intro to Rust",
            "thumbnail": "https://i.ytimg.com/vi/abc/hq720.jpg",
            "chapters": [
                {"start_time": 0.0, "end_time": 60.0, "title": "Intro"},
                {"start_time": 60.0, "end_time": 180.0, "title": "Ownership"}
            ]
        });

        let meta = parse_metadata(&doc);
        assert_eq!(meta.title, "Intro to Rust");
        assert!(meta.thumbnail.is_some());
        assert_eq!(meta.chapters.len(), 2);
        assert_eq!(meta.chapters[0].title, "Intro");
        assert_eq!(meta.chapters[1].start, 60.0);
        assert_eq!(meta.chapters[1].end, 180.0);
    }

    #[test]
    fn test_parse_metadata_without_chapters() {
        let doc = json!({"title": "No chapters here"});
        let meta = parse_metadata(&doc);
        assert_eq!(meta.title, "No chapters here");
        assert!(meta.chapters.is_empty());
        assert!(meta.thumbnail.is_none());
    }

    #[test]
    fn test_parse_metadata_skips_incomplete_chapters() {
        let doc = json!({
            "title": "t",
            "chapters": [
                {"start_time": 0.0, "title": "missing end"},
                {"start_time": 10.0, "end_time": 20.0, "title": "ok"}
            ]
        });
        let meta = parse_metadata(&doc);
        assert_eq!(meta.chapters.len(), 1);
        assert_eq!(meta.chapters[0].title, "ok");
    }

    #[tokio::test]
    async fn test_resolver_failure_is_error() {
        // `false` exits non-zero immediately; no network involved
        let resolver = StreamResolver::new(ResolverConfig {
            ytdlp_bin: "false".to_string(),
            ..ResolverConfig::default()
        });
        assert!(resolver.resolve_stream_url("dQw4w9WgXcQ", 720).await.is_err());
        assert!(resolver.fetch_metadata("dQw4w9WgXcQ").await.is_err());
    }
}
