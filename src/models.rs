//! Data models for the WeGrow backend.
//!
//! Stored documents use `#[serde(default)]` liberally: the database drops
//! empty maps and false-y children, and older documents predate some fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity-provider UID
pub type Uid = String;

// ============================================================================
// Users
// ============================================================================

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

/// Profile gender option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Others,
}

/// User document at `users/{uid}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Child's date of birth, `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_dob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<u8>,
}

// ============================================================================
// Feed
// ============================================================================

/// Per-user likes and flags with their counters.
///
/// Counters are always recomputed from the maps, so
/// `like_count == likes.len()` and `flag_count == flags.len()` after any
/// mutation through these methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reactions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub likes: BTreeMap<String, bool>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub flag_count: i64,
}

impl Reactions {
    /// Toggle `username`'s like; returns whether it is now liked
    pub fn toggle_like(&mut self, username: &str) -> bool {
        let liked = if self.likes.remove(username).is_some() {
            false
        } else {
            self.likes.insert(username.to_string(), true);
            true
        };
        self.like_count = self.likes.len() as i64;
        liked
    }

    /// Flag on behalf of `username`; returns false when already flagged
    pub fn flag(&mut self, username: &str) -> bool {
        let added = self.flags.insert(username.to_string(), true).is_none();
        self.flag_count = self.flags.len() as i64;
        added
    }
}

/// Comment stored at `posts/{post_id}/comments/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
    /// Unix seconds
    #[serde(default)]
    pub created_at: i64,
    /// Author role when the comment was written; never re-derived
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(flatten)]
    pub reactions: Reactions,
}

/// Post document at `posts/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_url: String,
    /// Sort key: negated microseconds, ascending = newest first
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub comments: BTreeMap<String, Comment>,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(flatten)]
    pub reactions: Reactions,
}

// ============================================================================
// Curated content
// ============================================================================

/// Curated video (`videos/{id}` and `top_videos/{id}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "isTopVideo")]
    pub is_top_video: bool,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub rank: i64,
    #[serde(default, alias = "Citation", skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

/// Parenting tip (`tips/{id}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Contest announcement (`contest/{id}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A stored document together with its key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyed<T> {
    pub id: String,
    #[serde(flatten)]
    pub item: T,
}

// ============================================================================
// Validation
// ============================================================================

/// Usernames become map keys in likes/flags, so the charset is restricted
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    let len = username.chars().count();
    if !(3..=30).contains(&len) {
        return Err("username must be 3 to 30 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("username may only contain letters, digits, '_' and '-'");
    }
    Ok(())
}

/// Minimal address sanity check; the identity provider validates the rest
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err("a valid email is required"),
    }
}

/// Parse a child's date of birth; it must lie strictly in the past
pub fn parse_child_dob(raw: &str, today: NaiveDate) -> Result<NaiveDate, &'static str> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| "child_dob must be a YYYY-MM-DD date")?;
    if date >= today {
        return Err("child age must be positive");
    }
    Ok(date)
}

// ============================================================================
// API Request Models
// ============================================================================

/// POST /register
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub child_dob: Option<String>,
}

/// POST /login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// POST /forget-password, POST /resend-verification
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

/// POST /reset-password
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub oob_code: String,
    #[serde(default)]
    pub new_password: String,
}

/// POST /delete_account
#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub uid: String,
}

/// POST /enter_data
#[derive(Debug, Deserialize)]
pub struct EnterDataRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub name: String,
    pub gender: Gender,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub child_dob: String,
    /// 0 or absent leaves the current image
    #[serde(default)]
    pub profile_image: i64,
}

/// POST /username
#[derive(Debug, Deserialize)]
pub struct ChangeUsernameRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub username: String,
}

/// GET /profile
#[derive(Debug, Deserialize)]
pub struct UidQuery {
    pub uid: Option<String>,
}

/// GET /profile_image, GET /posts/username
#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "startAfter")]
    pub start_after: Option<String>,
}

/// GET /posts
#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    pub limit: Option<String>,
    #[serde(rename = "startAfter")]
    pub start_after: Option<String>,
    #[serde(rename = "includeComments")]
    pub include_comments: Option<String>,
}

/// GET /posts/tags
#[derive(Debug, Deserialize)]
pub struct TagsQuery {
    pub tags: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "startAfter")]
    pub start_after: Option<String>,
}

/// POST /posts
#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `?post_id=` on post-level feed actions
#[derive(Debug, Deserialize)]
pub struct PostRef {
    pub post_id: Option<String>,
}

/// `?post_id=&comment_id=` on comment-level feed actions
#[derive(Debug, Deserialize)]
pub struct CommentRef {
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
}

/// POST /posts/comment
#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
}

/// Like and flag bodies
#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    #[serde(default)]
    pub username: String,
}

/// GET /videos
#[derive(Debug, Deserialize)]
pub struct VideosQuery {
    pub creator: Option<String>,
    pub tag: Option<String>,
}

/// POST /custom-notif
#[derive(Debug, Deserialize)]
pub struct CustomNotificationRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub topic: Option<String>,
}

// ============================================================================
// API Response Models
// ============================================================================

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error response: one line, no machine code
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /register
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub uid: Uid,
    pub role: Role,
    pub profile_image: u8,
    pub verification_email_sent: bool,
}

/// POST /login
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub uid: Uid,
    pub role: Role,
    pub username: Option<String>,
    pub profile_image: Option<u8>,
}

/// GET /profile
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub uid: Uid,
    #[serde(flatten)]
    pub user: User,
}

/// GET /profile_image
#[derive(Debug, Serialize)]
pub struct ProfileImageResponse {
    pub username: String,
    pub profile_image: u8,
}

/// One page of posts in sort order
#[derive(Debug, Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    /// Cursor for the next page; refers to the unfiltered page
    pub next_start_after: Option<i64>,
}

/// Like toggle result
#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub message: &'static str,
    pub like_count: i64,
    pub liked: bool,
}

/// Flag result
#[derive(Debug, Serialize)]
pub struct FlagResponse {
    pub message: &'static str,
    pub flag_count: i64,
}

/// Created document acknowledgement
#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub id: String,
    pub message: &'static str,
}
