//! Persistent keyed store for video records, frames, chat history, and tags.
//!
//! One JSON document per video ID under `<data_dir>/videos/`, frame images
//! under `<data_dir>/frames/<id>/`, tags in a single `tags.json`. An
//! in-memory cache fronts the documents. The store is an explicitly
//! constructed handle passed to the operations that need it; there is no
//! process-wide global.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::captions::CaptionSegment;
use crate::frames::FrameRecord;
use crate::stream::Chapter;

/// Chat participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One chat turn, persisted as part of the owning video record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    /// Frame images that were attached to this turn
    #[serde(default)]
    pub image_paths: Vec<PathBuf>,
}

/// Aggregate record for one video. Re-summarization overwrites in place;
/// there is exactly one record per platform video ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    /// English summary markdown
    pub summary_en: Option<String>,
    /// Chinese summary markdown
    pub summary_zh: Option<String>,
    /// Raw caption segments as fetched
    pub captions: Vec<CaptionSegment>,
    /// Raw chapter list as fetched
    pub chapters: Vec<Chapter>,
    /// User-supplied custom instruction used for the current summary
    pub custom_instruction: Option<String>,
    pub favorite: bool,
    pub chat_history: Vec<ChatMessage>,
    /// One row per (video, rounded timestamp)
    pub frames: Vec<FrameRecord>,
    pub created_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn has_summary(&self) -> bool {
        self.summary_en.is_some() || self.summary_zh.is_some()
    }

    /// The body frames are mined from and chat context is built on.
    pub fn primary_summary(&self) -> Option<&str> {
        self.summary_en
            .as_deref()
            .or(self.summary_zh.as_deref())
    }
}

/// History listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub video_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
}

/// Label for videos, many-to-many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TagSet {
    next_id: u64,
    tags: Vec<Tag>,
    /// (video_id, tag_id) pairs
    assignments: Vec<(String, u64)>,
}

/// Storage handle. Construct once at startup and share by reference.
pub struct VideoStore {
    videos_dir: PathBuf,
    frames_root: PathBuf,
    tags_path: PathBuf,
    cache: RwLock<HashMap<String, VideoRecord>>,
    tags: RwLock<TagSet>,
}

impl VideoStore {
    /// Open (or initialize) the store under `data_dir` and load existing
    /// records into the cache.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let videos_dir = data_dir.join("videos");
        let frames_root = data_dir.join("frames");
        let tags_path = data_dir.join("tags.json");

        fs::create_dir_all(&videos_dir).await?;
        fs::create_dir_all(&frames_root).await?;

        let mut cache = HashMap::new();
        let mut entries = fs::read_dir(&videos_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<VideoRecord>(&content) {
                        Ok(record) => {
                            cache.insert(record.video_id.clone(), record);
                        }
                        Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("Failed to read {}: {}", path.display(), e),
                }
            }
        }

        let tags = if tags_path.exists() {
            let content = fs::read_to_string(&tags_path).await?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Resetting unreadable tags file: {}", e);
                TagSet::default()
            })
        } else {
            TagSet::default()
        };

        info!("Video store initialized with {} records", cache.len());

        Ok(Self {
            videos_dir,
            frames_root,
            tags_path,
            cache: RwLock::new(cache),
            tags: RwLock::new(tags),
        })
    }

    pub fn frames_root(&self) -> &Path {
        &self.frames_root
    }

    pub fn frame_dir(&self, video_id: &str) -> PathBuf {
        self.frames_root.join(video_id)
    }

    fn record_path(&self, video_id: &str) -> PathBuf {
        self.videos_dir.join(format!("{}.json", video_id))
    }

    async fn persist(&self, record: &VideoRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(&record.video_id), content).await?;
        debug!("Persisted record for {}", record.video_id);
        Ok(())
    }

    async fn update_record<F>(&self, video_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut VideoRecord),
    {
        let mut cache = self.cache.write().await;
        let record = cache
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("no record for video {}", video_id))?;
        mutate(record);
        let snapshot = record.clone();
        drop(cache);
        self.persist(&snapshot).await
    }

    pub async fn get(&self, video_id: &str) -> Option<VideoRecord> {
        self.cache.read().await.get(video_id).cloned()
    }

    /// Insert or overwrite the record for its video ID.
    pub async fn upsert(&self, record: VideoRecord) -> Result<()> {
        self.persist(&record).await?;
        self.cache
            .write()
            .await
            .insert(record.video_id.clone(), record);
        Ok(())
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        let cache = self.cache.read().await;
        let mut entries: Vec<HistoryEntry> = cache
            .values()
            .map(|r| HistoryEntry {
                video_id: r.video_id.clone(),
                title: r.title.clone(),
                thumbnail: r.thumbnail.clone(),
                favorite: r.favorite,
                created_at: r.created_at,
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Delete a video: frame rows, frame images on disk, and the record, as
    /// one logical operation. Dependent data goes first so a partial failure
    /// never leaves orphaned images behind a missing record.
    pub async fn delete(&self, video_id: &str) -> Result<bool> {
        let existed = {
            let mut cache = self.cache.write().await;
            cache.remove(video_id).is_some()
        };

        remove_dir_if_present(&self.frame_dir(video_id)).await;
        remove_file_if_present(&self.record_path(video_id)).await;

        // Drop any tag assignments pointing at the record
        {
            let mut tags = self.tags.write().await;
            let before = tags.assignments.len();
            tags.assignments.retain(|(vid, _)| vid != video_id);
            if tags.assignments.len() != before {
                let snapshot = serde_json::to_string_pretty(&*tags)?;
                fs::write(&self.tags_path, snapshot).await?;
            }
        }

        if existed {
            info!("Deleted video record {}", video_id);
        }
        Ok(existed)
    }

    pub async fn get_frames(&self, video_id: &str) -> Vec<FrameRecord> {
        self.cache
            .read()
            .await
            .get(video_id)
            .map(|r| r.frames.clone())
            .unwrap_or_default()
    }

    /// Replace the frame rows for a video (idempotent upsert keyed by
    /// (video, timestamp) — the new set wins wholesale).
    pub async fn replace_frames(&self, video_id: &str, frames: Vec<FrameRecord>) -> Result<()> {
        self.update_record(video_id, |record| {
            record.frames = frames;
        })
        .await
    }

    /// Purge frame rows and their backing images. Called before any
    /// re-summarization and as part of deletion.
    pub async fn clear_frames(&self, video_id: &str) -> Result<()> {
        if self.cache.read().await.contains_key(video_id) {
            self.update_record(video_id, |record| {
                record.frames.clear();
            })
            .await?;
        }
        remove_dir_if_present(&self.frame_dir(video_id)).await;
        Ok(())
    }

    pub async fn append_chat(&self, video_id: &str, message: ChatMessage) -> Result<()> {
        self.update_record(video_id, |record| {
            record.chat_history.push(message);
        })
        .await
    }

    pub async fn set_favorite(&self, video_id: &str, favorite: bool) -> Result<()> {
        self.update_record(video_id, |record| {
            record.favorite = favorite;
        })
        .await
    }

    // ----- tags (peripheral CRUD) -----

    async fn persist_tags(&self, tags: &TagSet) -> Result<()> {
        let content = serde_json::to_string_pretty(tags)?;
        fs::write(&self.tags_path, content).await?;
        Ok(())
    }

    pub async fn create_tag(&self, name: &str) -> Result<Tag> {
        let mut tags = self.tags.write().await;
        if let Some(existing) = tags.tags.iter().find(|t| t.name == name) {
            return Ok(existing.clone());
        }
        tags.next_id += 1;
        let tag = Tag {
            id: tags.next_id,
            name: name.to_string(),
        };
        tags.tags.push(tag.clone());
        self.persist_tags(&tags).await?;
        Ok(tag)
    }

    pub async fn list_tags(&self) -> Vec<Tag> {
        self.tags.read().await.tags.clone()
    }

    pub async fn delete_tag(&self, tag_id: u64) -> Result<bool> {
        let mut tags = self.tags.write().await;
        let before = tags.tags.len();
        tags.tags.retain(|t| t.id != tag_id);
        tags.assignments.retain(|(_, tid)| *tid != tag_id);
        let removed = tags.tags.len() != before;
        if removed {
            self.persist_tags(&tags).await?;
        }
        Ok(removed)
    }

    pub async fn assign_tag(&self, video_id: &str, tag_id: u64) -> Result<()> {
        let mut tags = self.tags.write().await;
        if !tags.tags.iter().any(|t| t.id == tag_id) {
            return Err(anyhow!("no tag with id {}", tag_id));
        }
        let pair = (video_id.to_string(), tag_id);
        if !tags.assignments.contains(&pair) {
            tags.assignments.push(pair);
            self.persist_tags(&tags).await?;
        }
        Ok(())
    }

    pub async fn unassign_tag(&self, video_id: &str, tag_id: u64) -> Result<()> {
        let mut tags = self.tags.write().await;
        let before = tags.assignments.len();
        tags.assignments
            .retain(|(vid, tid)| !(vid == video_id && *tid == tag_id));
        if tags.assignments.len() != before {
            self.persist_tags(&tags).await?;
        }
        Ok(())
    }

    pub async fn video_tags(&self, video_id: &str) -> Vec<Tag> {
        let tags = self.tags.read().await;
        tags.assignments
            .iter()
            .filter(|(vid, _)| vid == video_id)
            .filter_map(|(_, tid)| tags.tags.iter().find(|t| t.id == *tid).cloned())
            .collect()
    }
}

/// Deleting a nonexistent path is not an error.
async fn remove_dir_if_present(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

async fn remove_file_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
