//! Summarize, frames, chat, and deletion flows, plus the cache-invalidation
//! rules tying them together.
//!
//! Per-video state machine: a stored record is served as-is unless the
//! request carries a custom instruction or forces a refresh; regeneration
//! reuses stored captions/chapters but always re-invokes the summarizer and
//! always purges frames first. A per-video-ID mutex serializes overlapping
//! requests for the same key so the purge/regenerate sequence cannot
//! interleave.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::captions::CaptionFetcher;
use crate::config::{Config, FrameConfig};
use crate::frames::{FrameExtractor, FrameRecord};
use crate::llm::{self, ChatMessage as LlmMessage, LLM};
use crate::store::{ChatMessage, ChatRole, HistoryEntry, VideoRecord, VideoStore};
use crate::stream::{StreamResolver, VideoMeta};
use crate::summarizer::{prompt, SummarizeInput, Summarizer};
use crate::video_id;

/// Frames inlined into chat context at most.
const MAX_CHAT_FRAMES: usize = 4;

/// Transcript excerpt length for chat context (characters).
const CHAT_TRANSCRIPT_CHARS: usize = 6_000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid video URL or ID: {0}")]
    InvalidVideoId(String),

    #[error("no captions available: {0}")]
    CaptionsUnavailable(String),

    #[error("video not found: {0}")]
    VideoNotFound(String),

    #[error("summarization failed: {0}")]
    SummarizerFailed(String),

    #[error("chat failed: {0}")]
    ChatFailed(String),

    #[error("no LLM credential configured")]
    LlmUnavailable,

    #[error("stream resolution failed: {0}")]
    StreamResolveFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// One summarize request.
#[derive(Debug, Clone, Default)]
pub struct SummarizeRequest {
    /// Raw URL or bare video ID
    pub input: String,
    /// Optional free-text instruction; presence forces regeneration
    pub instruction: Option<String>,
    /// Explicit refresh, bypassing the stored summary
    pub force: bool,
    /// Tag every timestamp as visual instead of model-selected moments
    pub visual_all: bool,
}

/// Application service wiring the pipeline together. Construct once at
/// startup with an explicitly initialized store handle.
pub struct DigestService {
    store: Arc<VideoStore>,
    captions: CaptionFetcher,
    resolver: StreamResolver,
    summarizer: Summarizer,
    frames: FrameExtractor,
    llm: Option<Arc<dyn LLM>>,
    frame_config: FrameConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DigestService {
    pub fn new(config: Config, store: Arc<VideoStore>) -> anyhow::Result<Self> {
        let llm: Option<Arc<dyn LLM>> = match llm::create_llm(&config.llm) {
            Ok(instance) => Some(Arc::from(instance)),
            Err(e) => {
                warn!("LLM unavailable ({}); summaries degrade to placeholders", e);
                None
            }
        };

        let captions = CaptionFetcher::new(
            config.captions.clone(),
            config.transcription.clone(),
            config.resolver.clone(),
        )?;
        let resolver = StreamResolver::new(config.resolver.clone());
        let summarizer = Summarizer::new(llm.clone(), config.summarizer.clone());
        let frames = FrameExtractor::new(
            config.frames.clone(),
            config.resolver.ffmpeg_bin.clone(),
            store.frames_root().to_path_buf(),
        );

        Ok(Self {
            store,
            captions,
            resolver,
            summarizer,
            frames,
            llm,
            frame_config: config.frames,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Single-flight guard: one mutex per video ID.
    async fn key_lock(&self, video_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(video_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn should_reuse(record: &VideoRecord, force: bool, instruction: Option<&str>) -> bool {
        record.has_summary() && !force && instruction.is_none()
    }

    /// Summarize a video, serving from the store when the cache rules allow.
    pub async fn summarize(&self, request: SummarizeRequest) -> Result<VideoRecord, ServiceError> {
        let video_id = video_id::parse(&request.input)
            .ok_or_else(|| ServiceError::InvalidVideoId(request.input.clone()))?;

        let lock = self.key_lock(&video_id).await;
        let _guard = lock.lock().await;

        let existing = self.store.get(&video_id).await;
        if let Some(record) = &existing {
            if Self::should_reuse(record, request.force, request.instruction.as_deref()) {
                info!("Serving stored summary for {}", video_id);
                return Ok(record.clone());
            }
        }

        // Reuse stored captions/chapters on regeneration; the acquisition
        // chain is the expensive part and the source material is immutable.
        let (captions, chapters, title, thumbnail) = match &existing {
            Some(record) if !record.captions.is_empty() => (
                record.captions.clone(),
                record.chapters.clone(),
                record.title.clone(),
                record.thumbnail.clone(),
            ),
            _ => {
                let (captions_result, meta_result) = tokio::join!(
                    self.captions.fetch(&video_id),
                    self.resolver.fetch_metadata(&video_id),
                );
                let captions = captions_result
                    .map_err(|e| ServiceError::CaptionsUnavailable(e.to_string()))?;
                let meta = meta_result.unwrap_or_else(|e| {
                    warn!("Metadata fetch failed for {}: {}", video_id, e);
                    VideoMeta::default()
                });
                let title = if meta.title.is_empty() {
                    video_id.clone()
                } else {
                    meta.title
                };
                (captions, meta.chapters, title, meta.thumbnail)
            }
        };

        // New text may reference a different timestamp set; stale frames must
        // never be shown against new prose.
        if existing.is_some() {
            self.store.clear_frames(&video_id).await?;
        }

        let bodies = self
            .summarizer
            .summarize(SummarizeInput {
                title: &title,
                captions: &captions,
                chapters: &chapters,
                instruction: request.instruction.as_deref(),
                visual_all: request.visual_all,
            })
            .await
            .map_err(|e| ServiceError::SummarizerFailed(e.to_string()))?;

        let record = VideoRecord {
            video_id: video_id.clone(),
            title,
            thumbnail,
            summary_en: bodies.en,
            summary_zh: bodies.zh,
            captions,
            chapters,
            custom_instruction: request.instruction.clone(),
            favorite: existing.as_ref().map(|r| r.favorite).unwrap_or(false),
            chat_history: existing
                .as_ref()
                .map(|r| r.chat_history.clone())
                .unwrap_or_default(),
            frames: Vec::new(),
            created_at: existing
                .as_ref()
                .map(|r| r.created_at)
                .unwrap_or_else(Utc::now),
        };
        self.store.upsert(record.clone()).await?;

        info!("Summary stored for {}", video_id);
        Ok(record)
    }

    /// Extract (or serve cached) key frames for a video's current summary.
    pub async fn frames(&self, input: &str) -> Result<Vec<FrameRecord>, ServiceError> {
        let video_id = video_id::parse(input)
            .ok_or_else(|| ServiceError::InvalidVideoId(input.to_string()))?;

        let lock = self.key_lock(&video_id).await;
        let _guard = lock.lock().await;

        let record = self
            .store
            .get(&video_id)
            .await
            .ok_or_else(|| ServiceError::VideoNotFound(video_id.clone()))?;

        // Extraction is the most expensive step in the system; an existing
        // set short-circuits unconditionally.
        if !record.frames.is_empty() {
            info!(
                "Serving {} cached frames for {}",
                record.frames.len(),
                video_id
            );
            return Ok(record.frames);
        }

        let Some(summary) = record.primary_summary() else {
            return Ok(Vec::new());
        };

        let timestamps = self.frames.mine(summary);
        if timestamps.is_empty() {
            return Ok(Vec::new());
        }

        let stream_url = self
            .resolver
            .resolve_stream_url(&video_id, self.frame_config.max_height)
            .await
            .map_err(|e| ServiceError::StreamResolveFailed(e.to_string()))?;

        let extracted = self.frames.extract(&video_id, &timestamps, &stream_url).await;
        self.store
            .replace_frames(&video_id, extracted.clone())
            .await?;
        Ok(extracted)
    }

    /// Follow-up chat about a summarized video. Returns a channel of
    /// incremental reply chunks; the assistant turn is persisted only once
    /// the full stream has been assembled.
    pub async fn chat(
        &self,
        input: &str,
        message: String,
        with_frames: bool,
    ) -> Result<mpsc::Receiver<anyhow::Result<String>>, ServiceError> {
        let video_id = video_id::parse(input)
            .ok_or_else(|| ServiceError::InvalidVideoId(input.to_string()))?;

        let record = self
            .store
            .get(&video_id)
            .await
            .ok_or_else(|| ServiceError::VideoNotFound(video_id.clone()))?;

        let llm = self.llm.clone().ok_or(ServiceError::LlmUnavailable)?;

        let attached_frames: Vec<_> = if with_frames {
            record.frames.iter().take(MAX_CHAT_FRAMES).cloned().collect()
        } else {
            Vec::new()
        };

        // User turn first, assistant turn after the stream completes.
        self.store
            .append_chat(
                &video_id,
                ChatMessage {
                    role: ChatRole::User,
                    text: message.clone(),
                    image_paths: attached_frames
                        .iter()
                        .map(|f| f.image_path.clone())
                        .collect(),
                },
            )
            .await?;

        let mut messages = Vec::new();
        let summary = record.primary_summary().unwrap_or("");
        let excerpt =
            crate::summarizer::build_transcript(&record.captions, CHAT_TRANSCRIPT_CHARS);
        messages.push(LlmMessage::system(prompt::chat_system_prompt(
            &record.title,
            summary,
            &excerpt,
        )));

        if !attached_frames.is_empty() {
            let images = encode_frame_images(&attached_frames).await;
            if !images.is_empty() {
                messages.push(LlmMessage::user_with_images(
                    "Reference frames extracted from the video, in timestamp order.",
                    images,
                ));
            }
        }

        for turn in &record.chat_history {
            match turn.role {
                ChatRole::User => messages.push(LlmMessage::user(turn.text.clone())),
                ChatRole::Assistant => messages.push(LlmMessage::assistant(turn.text.clone())),
            }
        }
        messages.push(LlmMessage::user(message));

        let mut upstream = llm
            .chat_stream(messages)
            .await
            .map_err(|e| ServiceError::ChatFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut full_reply = String::new();
            let mut forwarding = true;

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(chunk) => {
                        full_reply.push_str(&chunk);
                        if forwarding && tx.send(Ok(chunk)).await.is_err() {
                            // Receiver went away; keep assembling for the record
                            forwarding = false;
                        }
                    }
                    Err(e) => {
                        if forwarding {
                            let _ = tx.send(Err(e)).await;
                        }
                        break;
                    }
                }
            }

            if !full_reply.is_empty() {
                let result = store
                    .append_chat(
                        &video_id,
                        ChatMessage {
                            role: ChatRole::Assistant,
                            text: full_reply,
                            image_paths: Vec::new(),
                        },
                    )
                    .await;
                if let Err(e) = result {
                    warn!("Failed to persist assistant reply for {}: {}", video_id, e);
                }
            }
        });

        Ok(rx)
    }

    pub async fn get(&self, input: &str) -> Result<VideoRecord, ServiceError> {
        let video_id = video_id::parse(input)
            .ok_or_else(|| ServiceError::InvalidVideoId(input.to_string()))?;
        self.store
            .get(&video_id)
            .await
            .ok_or(ServiceError::VideoNotFound(video_id))
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.store.list().await
    }

    /// Remove a video record, its frame rows, and its images as one logical
    /// operation.
    pub async fn delete(&self, input: &str) -> Result<bool, ServiceError> {
        let video_id = video_id::parse(input)
            .ok_or_else(|| ServiceError::InvalidVideoId(input.to_string()))?;

        let lock = self.key_lock(&video_id).await;
        let _guard = lock.lock().await;

        Ok(self.store.delete(&video_id).await?)
    }

    pub async fn set_favorite(&self, input: &str, favorite: bool) -> Result<(), ServiceError> {
        let video_id = video_id::parse(input)
            .ok_or_else(|| ServiceError::InvalidVideoId(input.to_string()))?;
        self.store
            .set_favorite(&video_id, favorite)
            .await
            .map_err(|_| ServiceError::VideoNotFound(video_id))
    }

    pub fn store(&self) -> &Arc<VideoStore> {
        &self.store
    }
}

/// Read frame images into `data:` URIs for chat context. Unreadable files
/// are skipped.
async fn encode_frame_images(frames: &[FrameRecord]) -> Vec<String> {
    let mut images = Vec::new();
    for frame in frames {
        match tokio::fs::read(&frame.image_path).await {
            Ok(bytes) => {
                images.push(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)));
            }
            Err(e) => {
                warn!(
                    "Skipping unreadable frame image {}: {}",
                    frame.image_path.display(),
                    e
                );
            }
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionSegment;

    fn test_record(video_id: &str, summary: Option<&str>) -> VideoRecord {
        VideoRecord {
            video_id: video_id.to_string(),
            title: "Test".to_string(),
            thumbnail: None,
            summary_en: summary.map(|s| s.to_string()),
            summary_zh: None,
            captions: vec![CaptionSegment {
                start: 0.0,
                dur: 2.0,
                text: "hello world".to_string(),
            }],
            chapters: Vec::new(),
            custom_instruction: None,
            favorite: false,
            chat_history: Vec::new(),
            frames: Vec::new(),
            created_at: Utc::now(),
        }
    }

    async fn test_service(tmp: &std::path::Path) -> (DigestService, Arc<VideoStore>) {
        let store = Arc::new(VideoStore::new(tmp).await.unwrap());
        // Default config has no API key, so the service runs with a
        // placeholder summarizer and never reaches the network in tests.
        let mut config = Config::default();
        config.storage.data_dir = tmp.to_path_buf();
        let service = DigestService::new(config, store.clone()).unwrap();
        (service, store)
    }

    #[test]
    fn test_should_reuse_state_machine() {
        let cached = test_record("aaaaaaaaaaa", Some("# S"));
        assert!(DigestService::should_reuse(&cached, false, None));
        assert!(!DigestService::should_reuse(&cached, true, None));
        assert!(!DigestService::should_reuse(&cached, false, Some("focus on x")));

        let no_summary = test_record("aaaaaaaaaaa", None);
        assert!(!DigestService::should_reuse(&no_summary, false, None));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_any_work() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, _) = test_service(tmp.path()).await;

        let err = service
            .summarize(SummarizeRequest {
                input: "not a video".to_string(),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidVideoId(_)));

        assert!(matches!(
            service.frames("???").await.unwrap_err(),
            ServiceError::InvalidVideoId(_)
        ));
    }

    #[tokio::test]
    async fn test_summarize_serves_cached_record() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record("aaaaaaaaaaa", Some("# Cached")))
            .await
            .unwrap();

        let record = service
            .summarize(SummarizeRequest {
                input: "aaaaaaaaaaa".to_string(),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(record.summary_en.as_deref(), Some("# Cached"));
    }

    #[tokio::test]
    async fn test_forced_regeneration_purges_frames_and_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record("aaaaaaaaaaa", Some("# Old")))
            .await
            .unwrap();

        // Pre-existing frames on disk and in rows
        let frame_dir = store.frame_dir("aaaaaaaaaaa");
        tokio::fs::create_dir_all(&frame_dir).await.unwrap();
        tokio::fs::write(frame_dir.join("10.jpg"), b"jpeg").await.unwrap();
        store
            .replace_frames(
                "aaaaaaaaaaa",
                vec![FrameRecord {
                    video_id: "aaaaaaaaaaa".to_string(),
                    timestamp_seconds: 10,
                    image_path: frame_dir.join("10.jpg"),
                }],
            )
            .await
            .unwrap();

        let record = service
            .summarize(SummarizeRequest {
                input: "aaaaaaaaaaa".to_string(),
                force: true,
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();

        // Regeneration reused stored captions and produced a fresh
        // (placeholder) summary
        assert!(record.summary_en.unwrap().contains("Placeholder"));
        // Frames are gone until extraction is explicitly re-run
        assert!(store.get_frames("aaaaaaaaaaa").await.is_empty());
        assert!(!frame_dir.exists());
        // Still exactly one record
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_instruction_triggers_regeneration() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record("aaaaaaaaaaa", Some("# Old")))
            .await
            .unwrap();

        let record = service
            .summarize(SummarizeRequest {
                input: "aaaaaaaaaaa".to_string(),
                instruction: Some("focus on the demo".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();

        assert_ne!(record.summary_en.as_deref(), Some("# Old"));
        assert_eq!(
            record.custom_instruction.as_deref(),
            Some("focus on the demo")
        );
    }

    #[tokio::test]
    async fn test_frames_for_unknown_video() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, _) = test_service(tmp.path()).await;
        assert!(matches!(
            service.frames("aaaaaaaaaaa").await.unwrap_err(),
            ServiceError::VideoNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_frames_cached_set_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;

        let mut record = test_record("aaaaaaaaaaa", Some("# S [0:10](#tsv=10)"));
        record.frames = vec![FrameRecord {
            video_id: "aaaaaaaaaaa".to_string(),
            timestamp_seconds: 10,
            image_path: store.frame_dir("aaaaaaaaaaa").join("10.jpg"),
        }];
        store.upsert(record).await.unwrap();

        // Would otherwise need a stream URL; the cached set comes back as-is
        let frames = service.frames("aaaaaaaaaaa").await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_seconds, 10);
    }

    #[tokio::test]
    async fn test_frames_with_plain_marks_only_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record(
                "aaaaaaaaaaa",
                Some("Hello [0:00](#ts=0), world [1:05](#ts=65)"),
            ))
            .await
            .unwrap();

        // Zero frames requested, no stream resolution attempted
        let frames = service.frames("aaaaaaaaaaa").await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_delete_through_service() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record("aaaaaaaaaaa", Some("# S")))
            .await
            .unwrap();

        assert!(service.delete("aaaaaaaaaaa").await.unwrap());
        assert!(service.history().await.is_empty());
        assert!(matches!(
            service.get("aaaaaaaaaaa").await.unwrap_err(),
            ServiceError::VideoNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_chat_without_llm_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (service, store) = test_service(tmp.path()).await;
        store
            .upsert(test_record("aaaaaaaaaaa", Some("# S")))
            .await
            .unwrap();

        let err = service
            .chat("aaaaaaaaaaa", "hi".to_string(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LlmUnavailable));
    }
}
