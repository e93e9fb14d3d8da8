//! Caption acquisition through an ordered fallback chain.
//!
//! Tier 1 scrapes platform-native caption tracks, tier 2 shells out to an
//! external helper, tier 3 synthesizes captions with a local speech
//! recognizer. Tiers 1 and 2 fail softly (fall through); tier 3 is the last
//! resort and fails loudly.

pub mod providers;
pub mod transcribe;

pub use providers::{HelperCaptionProvider, NativeCaptionProvider};
pub use transcribe::Transcriber;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CaptionConfig, ResolverConfig, TranscriptionConfig};

/// One timed unit of transcript text. Sequences are time-ascending; zero
/// duration segments are legal and preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    /// Start time in seconds
    pub start: f64,
    /// Duration in seconds
    pub dur: f64,
    /// Caption text
    pub text: String,
}

/// One provider in the fallback chain. Implementations own their timeout;
/// any failure surfaces as `Err` and the chain moves on.
#[async_trait]
pub trait CaptionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>>;
}

/// Runs the provider chain and, when no textual captions exist anywhere,
/// falls back to local transcription.
pub struct CaptionFetcher {
    providers: Vec<Box<dyn CaptionProvider>>,
    transcriber: Transcriber,
}

impl CaptionFetcher {
    pub fn new(
        caption_config: CaptionConfig,
        transcription_config: TranscriptionConfig,
        resolver_config: ResolverConfig,
    ) -> Result<Self> {
        let providers: Vec<Box<dyn CaptionProvider>> = vec![
            Box::new(NativeCaptionProvider::new(caption_config.clone())?),
            Box::new(HelperCaptionProvider::new(caption_config)),
        ];
        let transcriber = Transcriber::new(transcription_config, resolver_config);

        Ok(Self {
            providers,
            transcriber,
        })
    }

    /// Custom chain, used by tests and alternative wiring.
    pub fn with_providers(
        providers: Vec<Box<dyn CaptionProvider>>,
        transcriber: Transcriber,
    ) -> Self {
        Self {
            providers,
            transcriber,
        }
    }

    /// Fetch captions for a video. Returns a non-empty, time-ordered segment
    /// sequence, or an error once every tier is exhausted.
    pub async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>> {
        if let Some(segments) = try_providers(&self.providers, video_id).await {
            return Ok(segments);
        }

        info!(
            "No textual captions for {}, falling back to local transcription",
            video_id
        );
        let segments = self.transcriber.transcribe(video_id).await?;
        Ok(sort_segments(segments))
    }
}

/// Attempt each soft-failure provider in order. Empty results and errors both
/// mean "try the next tier"; nothing here is surfaced to the caller.
pub(crate) async fn try_providers(
    providers: &[Box<dyn CaptionProvider>],
    video_id: &str,
) -> Option<Vec<CaptionSegment>> {
    for provider in providers {
        match provider.fetch(video_id).await {
            Ok(segments) if !segments.is_empty() => {
                info!(
                    "Caption provider '{}' returned {} segments for {}",
                    provider.name(),
                    segments.len(),
                    video_id
                );
                return Some(sort_segments(segments));
            }
            Ok(_) => {
                warn!(
                    "Caption provider '{}' returned no segments for {}",
                    provider.name(),
                    video_id
                );
            }
            Err(e) => {
                warn!(
                    "Caption provider '{}' failed for {}: {}",
                    provider.name(),
                    video_id,
                    e
                );
            }
        }
    }
    None
}

/// Enforce the non-decreasing `start` invariant.
fn sort_segments(mut segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    segments
}
