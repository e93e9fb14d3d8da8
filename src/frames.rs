//! Key-frame extraction for visual timestamp marks.
//!
//! Timestamps are mined from the summary markdown, deduplicated and capped,
//! then each surviving timestamp becomes one seek-then-grab ffmpeg call
//! against a remote stream URL. No full download ever happens here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::FrameConfig;
use crate::timestamp;

/// One extracted still image, keyed by (video, rounded timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub video_id: String,
    pub timestamp_seconds: u32,
    pub image_path: PathBuf,
}

/// Extracts still frames for a video's visual marks.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    config: FrameConfig,
    ffmpeg_bin: String,
    frames_root: PathBuf,
}

impl FrameExtractor {
    pub fn new(config: FrameConfig, ffmpeg_bin: String, frames_root: PathBuf) -> Self {
        Self {
            config,
            ffmpeg_bin,
            frames_root,
        }
    }

    /// Per-video output directory for frame images.
    pub fn video_dir(&self, video_id: &str) -> PathBuf {
        self.frames_root.join(video_id)
    }

    /// Mine the visual timestamps to extract from summary markdown: parse
    /// visual marks, collapse near-duplicates, cap the count keeping the
    /// earliest. Plain marks never trigger frame work.
    pub fn mine(&self, markdown: &str) -> Vec<u32> {
        let seconds = timestamp::visual_seconds(markdown);
        let mut deduped = timestamp::dedup_within(seconds, self.config.dedup_threshold_secs);
        deduped.truncate(self.config.max_frames);
        deduped
    }

    /// Grab one frame per timestamp from the stream URL. Each attempt is
    /// independent: a failed grab is logged and skipped, never fatal to the
    /// batch. Returns the records for frames that succeeded.
    pub async fn extract(
        &self,
        video_id: &str,
        timestamps: &[u32],
        stream_url: &str,
    ) -> Vec<FrameRecord> {
        if timestamps.is_empty() {
            return Vec::new();
        }

        let out_dir = self.video_dir(video_id);
        if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
            warn!("Failed to create frame directory {}: {}", out_dir.display(), e);
            return Vec::new();
        }

        let mut records = Vec::with_capacity(timestamps.len());
        for &ts in timestamps {
            let image_path = out_dir.join(format!("{}.jpg", ts));
            match self.grab_frame(stream_url, ts, &image_path).await {
                Ok(()) => {
                    records.push(FrameRecord {
                        video_id: video_id.to_string(),
                        timestamp_seconds: ts,
                        image_path,
                    });
                }
                Err(e) => {
                    warn!("Frame grab at {}s failed for {}: {}", ts, video_id, e);
                }
            }
        }

        info!(
            "Extracted {}/{} frames for {}",
            records.len(),
            timestamps.len(),
            video_id
        );
        records
    }

    /// Fast seek then single-frame grab. `-ss` before `-i` makes ffmpeg seek
    /// on the remote stream instead of decoding from the start.
    async fn grab_frame(&self, stream_url: &str, ts: u32, out_path: &Path) -> anyhow::Result<()> {
        let status = tokio::time::timeout(
            Duration::from_secs(self.config.grab_timeout_secs),
            Command::new(&self.ffmpeg_bin)
                .args([
                    "-ss",
                    &ts.to_string(),
                    "-i",
                    stream_url,
                    "-frames:v",
                    "1",
                    "-q:v",
                    "2",
                    "-y",
                ])
                .arg(out_path)
                .status(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!("frame grab timed out after {}s", self.config.grab_timeout_secs)
        })??;

        if !status.success() {
            return Err(anyhow::anyhow!("ffmpeg exited with {}", status));
        }
        Ok(())
    }
}
