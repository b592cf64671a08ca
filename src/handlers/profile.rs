//! Profile data, usernames and avatars.

use super::{
    claim, ensure_unowned, find_by_username, present, release, require_key, ApiError, AppState, Unique,
};
use crate::extract::{JsonBody, QueryParams};
use crate::models::*;
use crate::store;
use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

async fn load_user(state: &AppState, uid: &str) -> Result<User, ApiError> {
    store::read(state.db.as_ref(), &format!("users/{uid}"))
        .await?
        .ok_or(ApiError::NotFound("user not found"))
}

/// POST /enter_data - Fill in profile details
///
/// All validation and uniqueness checks run before anything is written.
pub async fn enter_data(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<EnterDataRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let uid = require_key(Some(req.uid.as_str()), "uid")?;
    let profile_image = match req.profile_image {
        0 => None,
        n if (1..=10).contains(&n) => Some(n as u8),
        _ => return Err(ApiError::invalid("profile_image must be between 1 and 10")),
    };
    let child_dob = parse_child_dob(&req.child_dob, Utc::now().date_naive())
        .map_err(ApiError::invalid)?;

    let current = load_user(&state, uid).await?;
    let db = state.db.as_ref();

    let phone = present(req.phone_number.as_deref());
    let replaced_phone = match phone {
        Some(number) if current.phone_number.as_deref() != Some(number) => {
            ensure_unowned(db, Unique::Phone, number, Some(uid)).await?;
            claim(db, Unique::Phone, number, uid).await?;
            current.phone_number.as_deref()
        }
        _ => None,
    };

    let mut fields = Map::new();
    if let Some(number) = phone {
        fields.insert("phone_number".into(), json!(number));
    }
    if let Some(name) = present(Some(req.name.as_str())) {
        fields.insert("name".into(), json!(name));
    }
    fields.insert("gender".into(), json!(req.gender));
    if let Some(city) = present(Some(req.city.as_str())) {
        fields.insert("city".into(), json!(city));
    }
    fields.insert(
        "child_dob".into(),
        Value::String(child_dob.format("%Y-%m-%d").to_string()),
    );
    if let Some(image) = profile_image {
        fields.insert("profile_image".into(), json!(image));
    }
    db.update(&format!("users/{uid}"), fields).await?;

    if let Some(old) = replaced_phone {
        release(db, Unique::Phone, old, uid).await?;
    }

    info!(uid, "Profile updated");
    Ok(Json(MessageResponse {
        message: "profile updated",
    }))
}

/// POST /username - Change a user's username
pub async fn change_username(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ChangeUsernameRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let uid = require_key(Some(req.uid.as_str()), "uid")?;
    let username = present(Some(req.username.as_str()))
        .ok_or_else(|| ApiError::invalid("username is required"))?;
    validate_username(username).map_err(ApiError::invalid)?;

    let current = load_user(&state, uid).await?;
    if current.username.as_deref() == Some(username) {
        return Ok(Json(MessageResponse {
            message: "username updated",
        }));
    }

    let db = state.db.as_ref();
    ensure_unowned(db, Unique::Username, username, Some(uid)).await?;
    claim(db, Unique::Username, username, uid).await?;
    db.set(&format!("users/{uid}/username"), json!(username)).await?;
    if let Some(old) = &current.username {
        release(db, Unique::Username, old, uid).await?;
    }

    info!(uid, "Username changed");
    Ok(Json(MessageResponse {
        message: "username updated",
    }))
}

/// GET /profile - Full user document
pub async fn get_profile(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<UidQuery>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let uid = require_key(query.uid.as_deref(), "uid")?;
    let user = load_user(&state, uid).await?;
    Ok(Json(ProfileResponse {
        uid: uid.to_string(),
        user,
    }))
}

/// GET /profile_image - Avatar index for a username
pub async fn get_profile_image(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<UsernameQuery>,
) -> Result<Json<ProfileImageResponse>, ApiError> {
    let username = present(query.username.as_deref())
        .ok_or_else(|| ApiError::invalid("username is required"))?;
    let (_, user) = find_by_username(state.db.as_ref(), username)
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;
    let profile_image = user
        .profile_image
        .ok_or(ApiError::NotFound("profile image not set"))?;
    Ok(Json(ProfileImageResponse {
        username: username.to_string(),
        profile_image,
    }))
}
