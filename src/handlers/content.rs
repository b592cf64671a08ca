//! Admin-curated content: videos, top videos, tips, the contest and
//! custom broadcasts.
//!
//! Writes require the `user_id` header of an admin account. Reads are open.

use super::{present, ApiError, AppState};
use crate::auth::require_admin;
use crate::extract::{JsonBody, QueryParams};
use crate::models::*;
use crate::notify::new_video_message;
use crate::store::{self, Database};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

fn check_video(video: &mut Video) -> Result<(), ApiError> {
    video.link = video.link.trim().to_string();
    video.title = video.title.trim().to_string();
    if video.link.is_empty() || video.title.is_empty() {
        return Err(ApiError::invalid("link and title are required"));
    }
    Ok(())
}

/// Highest rank first; equal ranks keep store order
fn by_rank(mut videos: Vec<Keyed<Video>>) -> Vec<Keyed<Video>> {
    videos.sort_by(|a, b| b.item.rank.cmp(&a.item.rank));
    videos
}

async fn keyed_children<T: DeserializeOwned>(
    db: &dyn Database,
    root: &str,
) -> Result<Vec<Keyed<T>>, ApiError> {
    Ok(store::read_children::<T>(db, root)
        .await?
        .into_iter()
        .map(|(id, item)| Keyed { id, item })
        .collect())
}

/// POST /videos - Save a video and announce it to subscribers
///
/// A failed announcement answers `500` but the video stays saved.
pub async fn save_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(mut video): JsonBody<Video>,
) -> Result<(StatusCode, Json<SavedResponse>), ApiError> {
    let admin = require_admin(state.db.as_ref(), &headers).await?;
    check_video(&mut video)?;

    let id = Uuid::new_v4().to_string();
    store::write(state.db.as_ref(), &format!("videos/{id}"), &video).await?;
    info!(video_id = %id, admin = %admin, "Video saved");

    let (title, body) = new_video_message(&video.title, &video.creator);
    state
        .notifier
        .send_to_topic(&state.config.new_video_topic, &title, &body)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SavedResponse {
            id,
            message: "video saved",
        }),
    ))
}

/// GET /videos - Videos filtered by creator and tag, highest rank first
pub async fn list_videos(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<VideosQuery>,
) -> Result<Json<Vec<Keyed<Video>>>, ApiError> {
    let creator = present(query.creator.as_deref());
    let tag = present(query.tag.as_deref());

    let videos = keyed_children::<Video>(state.db.as_ref(), "videos")
        .await?
        .into_iter()
        .filter(|v| creator.map_or(true, |c| v.item.creator == c))
        .filter(|v| tag.map_or(true, |t| v.item.tags.iter().any(|vt| vt == t)))
        .collect();
    Ok(Json(by_rank(videos)))
}

/// POST /videos/top - Save a top video (no announcement)
pub async fn save_top_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(mut video): JsonBody<Video>,
) -> Result<(StatusCode, Json<SavedResponse>), ApiError> {
    require_admin(state.db.as_ref(), &headers).await?;
    check_video(&mut video)?;
    video.is_top_video = true;

    let id = Uuid::new_v4().to_string();
    store::write(state.db.as_ref(), &format!("top_videos/{id}"), &video).await?;
    info!(video_id = %id, "Top video saved");

    Ok((
        StatusCode::CREATED,
        Json(SavedResponse {
            id,
            message: "top video saved",
        }),
    ))
}

/// GET /videos/top - Top videos, highest rank first
pub async fn list_top_videos(
    State(state): State<AppState>,
) -> Result<Json<Vec<Keyed<Video>>>, ApiError> {
    let videos = keyed_children::<Video>(state.db.as_ref(), "top_videos").await?;
    Ok(Json(by_rank(videos)))
}

/// POST /tips - Replace the current tip
pub async fn save_tip(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(mut tip): JsonBody<Tip>,
) -> Result<(StatusCode, Json<SavedResponse>), ApiError> {
    require_admin(state.db.as_ref(), &headers).await?;
    if tip.title.trim().is_empty() || tip.content.trim().is_empty() {
        return Err(ApiError::invalid("title and content are required"));
    }
    tip.created_at = Some(Utc::now());

    let id = Uuid::new_v4().to_string();
    let db = state.db.as_ref();
    db.delete("tips").await?;
    store::write(db, &format!("tips/{id}"), &tip).await?;
    info!(tip_id = %id, "Tip replaced");

    Ok((
        StatusCode::CREATED,
        Json(SavedResponse {
            id,
            message: "tip saved",
        }),
    ))
}

/// GET /tips
pub async fn get_tips(State(state): State<AppState>) -> Result<Json<Vec<Keyed<Tip>>>, ApiError> {
    Ok(Json(keyed_children(state.db.as_ref(), "tips").await?))
}

/// POST /contest - Replace the current contest
pub async fn save_contest(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(mut contest): JsonBody<Contest>,
) -> Result<(StatusCode, Json<SavedResponse>), ApiError> {
    require_admin(state.db.as_ref(), &headers).await?;
    if contest.title.trim().is_empty() || contest.description.trim().is_empty() {
        return Err(ApiError::invalid("title and description are required"));
    }
    contest.created_at = Some(Utc::now());

    let id = Uuid::new_v4().to_string();
    let db = state.db.as_ref();
    db.delete("contest").await?;
    store::write(db, &format!("contest/{id}"), &contest).await?;
    info!(contest_id = %id, "Contest replaced");

    Ok((
        StatusCode::CREATED,
        Json(SavedResponse {
            id,
            message: "contest saved",
        }),
    ))
}

/// GET /contest - The running contest
pub async fn get_contest(State(state): State<AppState>) -> Result<Json<Keyed<Contest>>, ApiError> {
    keyed_children::<Contest>(state.db.as_ref(), "contest")
        .await?
        .into_iter()
        .next()
        .map(Json)
        .ok_or(ApiError::NotFound("no active contest"))
}

/// POST /custom-notif - Broadcast an arbitrary notification
pub async fn custom_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CustomNotificationRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = require_admin(state.db.as_ref(), &headers).await?;
    let title = present(Some(req.title.as_str()));
    let body = present(Some(req.body.as_str()));
    let (Some(title), Some(body)) = (title, body) else {
        return Err(ApiError::invalid("title and body are required"));
    };
    let topic = present(req.topic.as_deref()).unwrap_or(&state.config.new_video_topic);

    state.notifier.send_to_topic(topic, title, body).await?;
    info!(topic, admin = %admin, "Custom notification sent");

    Ok(Json(MessageResponse {
        message: "notification sent",
    }))
}
