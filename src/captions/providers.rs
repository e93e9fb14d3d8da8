//! Tier 1 and tier 2 caption providers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{CaptionProvider, CaptionSegment};
use crate::config::CaptionConfig;
use crate::video_id;

/// Tier 1: platform-native caption tracks scraped from the watch page.
///
/// The page embeds a `captionTracks` JSON array listing available tracks;
/// the selected track is fetched in `json3` format and parsed into segments.
pub struct NativeCaptionProvider {
    config: CaptionConfig,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
struct CaptionTrack {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "languageCode")]
    language_code: String,
    /// `"asr"` marks auto-generated tracks
    #[serde(default)]
    kind: Option<String>,
}

impl CaptionTrack {
    fn is_auto_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

#[derive(Debug, Deserialize)]
struct Json3Document {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs")]
    start_ms: Option<u64>,
    #[serde(rename = "dDurationMs")]
    duration_ms: Option<u64>,
    #[serde(default)]
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

fn caption_tracks_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""captionTracks":(\[.*?\])"#).unwrap())
}

impl NativeCaptionProvider {
    pub fn new(config: CaptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    async fn fetch_watch_page(&self, video_id: &str) -> Result<String> {
        let response = self
            .client
            .get(video_id::watch_url(video_id))
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("watch page returned {}", response.status()));
        }

        Ok(response.text().await?)
    }

    async fn fetch_track(&self, track: &CaptionTrack) -> Result<Vec<CaptionSegment>> {
        let url = format!("{}&fmt=json3", track.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("caption track returned {}", response.status()));
        }

        parse_json3(&response.text().await?)
    }
}

#[async_trait]
impl CaptionProvider for NativeCaptionProvider {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>> {
        let html = self.fetch_watch_page(video_id).await?;
        let tracks = extract_caption_tracks(&html)?;
        let track = select_track(&tracks, &self.config.preferred_languages)
            .ok_or_else(|| anyhow!("no caption tracks listed"))?;

        debug!(
            "Selected caption track lang={} auto={}",
            track.language_code,
            track.is_auto_generated()
        );
        self.fetch_track(track).await
    }
}

/// Pull the `captionTracks` array out of the watch-page HTML.
fn extract_caption_tracks(html: &str) -> Result<Vec<CaptionTrack>> {
    let caps = caption_tracks_regex()
        .captures(html)
        .ok_or_else(|| anyhow!("no captionTracks block in watch page"))?;
    let tracks: Vec<CaptionTrack> = serde_json::from_str(&caps[1])?;
    Ok(tracks)
}

/// Track preference: manually authored track in preferred-language order,
/// then any manual track, then whatever is first.
fn select_track<'a>(
    tracks: &'a [CaptionTrack],
    preferred_languages: &[String],
) -> Option<&'a CaptionTrack> {
    for lang in preferred_languages {
        if let Some(track) = tracks
            .iter()
            .find(|t| !t.is_auto_generated() && t.language_code.starts_with(lang.as_str()))
        {
            return Some(track);
        }
    }
    tracks
        .iter()
        .find(|t| !t.is_auto_generated())
        .or_else(|| tracks.first())
}

/// Parse a `json3` caption document into segments. Events without text are
/// skipped; zero-duration events are kept.
fn parse_json3(body: &str) -> Result<Vec<CaptionSegment>> {
    let doc: Json3Document = serde_json::from_str(body)?;

    let mut segments = Vec::with_capacity(doc.events.len());
    for event in doc.events {
        let Some(start_ms) = event.start_ms else {
            continue;
        };
        let Some(segs) = event.segs else {
            continue;
        };

        let text = segs
            .iter()
            .map(|s| s.utf8.as_str())
            .collect::<String>()
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }

        segments.push(CaptionSegment {
            start: start_ms as f64 / 1000.0,
            dur: event.duration_ms.unwrap_or(0) as f64 / 1000.0,
            text,
        });
    }

    Ok(segments)
}

/// Tier 2: external helper subprocess. The configured command is run with
/// the video ID appended as its single extra argument and must print a JSON
/// array of `{start, dur, text}` on stdout.
pub struct HelperCaptionProvider {
    config: CaptionConfig,
}

impl HelperCaptionProvider {
    pub fn new(config: CaptionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CaptionProvider for HelperCaptionProvider {
    fn name(&self) -> &'static str {
        "helper"
    }

    async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>> {
        let (program, args) = self
            .config
            .helper_command
            .split_first()
            .ok_or_else(|| anyhow!("helper command not configured"))?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.helper_timeout_secs),
            Command::new(program).args(args).arg(video_id).output(),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "caption helper timed out after {}s",
                self.config.helper_timeout_secs
            )
        })??;

        if !output.status.success() {
            return Err(anyhow!(
                "caption helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let segments: Vec<CaptionSegment> = serde_json::from_str(stdout.trim())?;
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(lang: &str, kind: Option<&str>) -> CaptionTrack {
        CaptionTrack {
            base_url: format!("https://example.com/{}", lang),
            language_code: lang.to_string(),
            kind: kind.map(|k| k.to_string()),
        }
    }

    #[test]
    fn test_extract_caption_tracks() {
        let html = r#"...,"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc\u0026lang=en","languageCode":"en"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&lang=en&kind=asr","languageCode":"en","kind":"asr"}]}},..."#;
        let tracks = extract_caption_tracks(html).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].language_code, "en");
        assert!(!tracks[0].is_auto_generated());
        assert!(tracks[1].is_auto_generated());
        // JSON unicode escapes decode to plain ampersands
        assert!(tracks[0].base_url.contains("?v=abc&lang=en"));
    }

    #[test]
    fn test_extract_caption_tracks_missing() {
        assert!(extract_caption_tracks("<html>no captions</html>").is_err());
    }

    #[test]
    fn test_select_track_prefers_manual_in_language_order() {
        let tracks = vec![
            track("en", Some("asr")),
            track("zh-Hans", None),
            track("en", None),
        ];
        let prefs = vec!["en".to_string(), "zh".to_string()];
        let selected = select_track(&tracks, &prefs).unwrap();
        assert_eq!(selected.language_code, "en");
        assert!(!selected.is_auto_generated());
    }

    #[test]
    fn test_select_track_falls_back_to_auto() {
        let tracks = vec![track("ja", Some("asr"))];
        let prefs = vec!["en".to_string()];
        let selected = select_track(&tracks, &prefs).unwrap();
        assert_eq!(selected.language_code, "ja");
    }

    #[test]
    fn test_select_track_empty() {
        assert!(select_track(&[], &["en".to_string()]).is_none());
    }

    #[test]
    fn test_parse_json3() {
        let body = r#"{
            "events": [
                {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "Hello "}, {"utf8": "world"}]},
                {"tStartMs": 2000, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 3200, "dDurationMs": 0, "segs": [{"utf8": "zero"}]},
                {"tStartMs": 5000, "dDurationMs": 1000}
            ]
        }"#;
        let segments = parse_json3(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello world");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].dur, 1.5);
        // Zero-duration segments survive
        assert_eq!(segments[1].start, 3.2);
        assert_eq!(segments[1].dur, 0.0);
    }

    #[tokio::test]
    async fn test_helper_provider_parses_stdout() {
        let config = CaptionConfig {
            helper_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"echo '[{"start":0.0,"dur":1.2,"text":"hi"},{"start":1.2,"dur":0.0,"text":"there"}]'"#.to_string(),
            ],
            ..CaptionConfig::default()
        };
        let provider = HelperCaptionProvider::new(config);
        let segments = provider.fetch("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "hi");
        assert_eq!(segments[1].dur, 0.0);
    }

    #[tokio::test]
    async fn test_helper_provider_nonzero_exit_is_error() {
        let config = CaptionConfig {
            helper_command: vec!["false".to_string()],
            ..CaptionConfig::default()
        };
        let provider = HelperCaptionProvider::new(config);
        assert!(provider.fetch("dQw4w9WgXcQ").await.is_err());
    }

    #[tokio::test]
    async fn test_helper_provider_bad_json_is_error() {
        let config = CaptionConfig {
            helper_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo not-json".to_string(),
            ],
            ..CaptionConfig::default()
        };
        let provider = HelperCaptionProvider::new(config);
        assert!(provider.fetch("dQw4w9WgXcQ").await.is_err());
    }
}
