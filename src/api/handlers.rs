//! API request handlers. Thin wrappers over the service; routing and status
//! mapping live in `server`.

use serde_json::{json, Value};

use super::models::SummarizeBody;
use crate::service::{DigestService, ServiceError, SummarizeRequest};

pub async fn health_check() -> Value {
    json!({
        "status": "healthy",
        "service": "yt-digest",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn summarize(
    service: &DigestService,
    body: SummarizeBody,
) -> Result<Value, ServiceError> {
    let record = service
        .summarize(SummarizeRequest {
            input: body.url,
            instruction: body.instruction,
            force: body.force,
            visual_all: body.visual_all,
        })
        .await?;
    Ok(serde_json::to_value(record).map_err(anyhow::Error::from)?)
}

pub async fn get_video(service: &DigestService, id: &str) -> Result<Value, ServiceError> {
    let record = service.get(id).await?;
    let tags = service.store().video_tags(&record.video_id).await;
    let mut value = serde_json::to_value(record).map_err(anyhow::Error::from)?;
    value["tags"] = serde_json::to_value(tags).map_err(anyhow::Error::from)?;
    Ok(value)
}

pub async fn history(service: &DigestService) -> Result<Value, ServiceError> {
    let entries = service.history().await;
    Ok(json!({
        "total": entries.len(),
        "videos": entries,
    }))
}

pub async fn delete_video(service: &DigestService, id: &str) -> Result<Value, ServiceError> {
    let deleted = service.delete(id).await?;
    Ok(json!({ "deleted": deleted }))
}

pub async fn extract_frames(service: &DigestService, id: &str) -> Result<Value, ServiceError> {
    let frames = service.frames(id).await?;
    Ok(json!({
        "total": frames.len(),
        "frames": frames,
    }))
}

pub async fn set_favorite(
    service: &DigestService,
    id: &str,
    favorite: bool,
) -> Result<Value, ServiceError> {
    service.set_favorite(id, favorite).await?;
    Ok(json!({ "favorite": favorite }))
}

pub async fn list_tags(service: &DigestService) -> Result<Value, ServiceError> {
    Ok(serde_json::to_value(service.store().list_tags().await).map_err(anyhow::Error::from)?)
}

pub async fn create_tag(service: &DigestService, name: &str) -> Result<Value, ServiceError> {
    let tag = service.store().create_tag(name).await?;
    Ok(serde_json::to_value(tag).map_err(anyhow::Error::from)?)
}

pub async fn delete_tag(service: &DigestService, tag_id: u64) -> Result<Value, ServiceError> {
    let deleted = service.store().delete_tag(tag_id).await?;
    Ok(json!({ "deleted": deleted }))
}

pub async fn assign_tag(
    service: &DigestService,
    id: &str,
    tag_id: u64,
) -> Result<Value, ServiceError> {
    service.store().assign_tag(id, tag_id).await?;
    Ok(json!({ "assigned": true }))
}

pub async fn unassign_tag(
    service: &DigestService,
    id: &str,
    tag_id: u64,
) -> Result<Value, ServiceError> {
    service.store().unassign_tag(id, tag_id).await?;
    Ok(json!({ "assigned": false }))
}
