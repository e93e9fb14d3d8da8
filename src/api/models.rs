//! API request bodies.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SummarizeBody {
    pub url: String,
    pub instruction: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub visual_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub with_frames: bool,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteBody {
    pub favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct TagBody {
    pub name: String,
}
