/// yt-digest
///
/// Bilingual YouTube video summaries with clickable timestamp marks,
/// key-frame extraction, and follow-up chat. The core is the timestamp
/// protocol tying LLM-generated markdown, caption/chapter data, and locally
/// extracted frames together across caching, regeneration, and deletion.

pub mod captions;
pub mod config;
pub mod frames;
pub mod llm;
pub mod service;
pub mod store;
pub mod stream;
pub mod summarizer;
pub mod timestamp;
pub mod video_id;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::captions::{CaptionFetcher, CaptionSegment};
pub use crate::config::{Config, LLMConfig};
pub use crate::frames::{FrameExtractor, FrameRecord};
pub use crate::llm::LLMProvider;
pub use crate::service::{DigestService, ServiceError, SummarizeRequest};
pub use crate::store::{VideoRecord, VideoStore};
pub use crate::stream::{Chapter, StreamResolver};
pub use crate::summarizer::Summarizer;
pub use crate::timestamp::{MarkKind, TimestampMark};
