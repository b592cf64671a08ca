//! HTTP request handlers for the WeGrow API.
//!
//! Handlers are grouped by area:
//! - [`account`]: registration, login and password flows
//! - [`profile`]: profile data, usernames and avatars
//! - [`feed`]: posts, comments, likes and flags
//! - [`content`]: curated videos, tips, the contest and broadcasts
//!
//! Every failure renders as `{"error": "..."}`. Causes of `500`s are logged
//! here and never echoed to the client.

pub mod account;
pub mod content;
pub mod feed;
pub mod profile;

use crate::auth::{self, AuthError};
use crate::config::Config;
use crate::feed::SortKeyClock;
use crate::identity::{IdentityError, IdentityProvider};
use crate::mail::{MailError, Mailer};
use crate::models::{ErrorResponse, HealthResponse, User};
use crate::notify::{NotifyError, Notifier};
use crate::store::{self, Database, DbError, Query};
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, error};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub identity: Arc<dyn IdentityProvider>,
    pub mailer: Arc<dyn Mailer>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
    /// Post sort keys; the only in-process mutable state
    pub clock: Arc<SortKeyClock>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Arc<dyn Database>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Arc<dyn Mailer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            identity,
            mailer,
            notifier,
            config: Arc::new(config),
            clock: Arc::new(SortKeyClock::new()),
        }
    }

    /// Derive the provider credential off the async workers
    pub(crate) async fn credential(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let email = email.to_string();
        let password = password.to_string();
        let pepper = self.config.credential_pepper.clone();
        let iterations = self.config.credential_iterations;
        tokio::task::spawn_blocking(move || {
            auth::derive_credential(&email, &password, &pepper, iterations)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Credential derivation task failed");
            ApiError::Internal
        })
    }
}

// === Health Check ===

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// === Uniqueness indexes ===

/// User fields that must be unique across accounts.
///
/// Each has a claim index `{root}/{hex(value)}` holding the owner's UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unique {
    Username,
    Phone,
}

impl Unique {
    fn field(self) -> &'static str {
        match self {
            Unique::Username => "username",
            Unique::Phone => "phone_number",
        }
    }

    fn index_path(self, value: &str) -> String {
        let root = match self {
            Unique::Username => "usernames",
            Unique::Phone => "phone_numbers",
        };
        format!("{root}/{}", hex::encode(value))
    }

    fn taken(self) -> ApiError {
        match self {
            Unique::Username => ApiError::Conflict("username already taken"),
            Unique::Phone => ApiError::Conflict("phone number already registered"),
        }
    }
}

/// Fail with `409` when a user document other than `owner` holds `value`.
///
/// Covers documents written before the claim indexes existed.
pub(crate) async fn ensure_unowned(
    db: &dyn Database,
    kind: Unique,
    value: &str,
    owner: Option<&str>,
) -> Result<(), ApiError> {
    let query = Query::order_by(kind.field()).equal_to(value).limit(2);
    let holders = db.query("users", &query).await?;
    if holders.iter().any(|(uid, _)| Some(uid.as_str()) != owner) {
        return Err(kind.taken());
    }
    Ok(())
}

/// Atomically claim `value` for `uid`; `409` if another user holds it
pub(crate) async fn claim(db: &dyn Database, kind: Unique, value: &str, uid: &str) -> Result<(), ApiError> {
    store::transact::<String, ApiError, _>(db, &kind.index_path(value), |holder| match holder {
        Some(other) if other != uid => Err(kind.taken()),
        _ => Ok(Some(uid.to_string())),
    })
    .await?;
    debug!(field = kind.field(), "Uniqueness index claimed");
    Ok(())
}

/// Release `value` if `uid` still holds it
pub(crate) async fn release(db: &dyn Database, kind: Unique, value: &str, uid: &str) -> Result<(), ApiError> {
    store::transact::<String, ApiError, _>(db, &kind.index_path(value), |holder| match holder {
        Some(owner) if owner == uid => Ok(None),
        other => Ok(other),
    })
    .await?;
    Ok(())
}

/// Look a user up by username
pub(crate) async fn find_by_username(
    db: &dyn Database,
    username: &str,
) -> Result<Option<(String, User)>, ApiError> {
    let query = Query::order_by("username").equal_to(username).limit(1);
    let mut found = store::query_as::<User>(db, "users", &query).await?;
    Ok(found.pop())
}

/// Trimmed, non-empty string
pub(crate) fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Client-supplied id that must name exactly one store node
pub(crate) fn require_key<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ApiError> {
    let key = present(value).ok_or_else(|| ApiError::invalid(format!("{name} is required")))?;
    if !store::valid_key(key) {
        return Err(ApiError::invalid(format!("invalid {name}")));
    }
    Ok(key)
}

// === Error Handling ===

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(Cow<'static, str>),

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("admin access required")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        ApiError::InvalidInput(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Contention => ApiError::Conflict("concurrent update, please retry"),
            DbError::InvalidPath(path) => {
                debug!(path, "Rejected unsafe store path");
                ApiError::invalid("invalid identifier")
            }
            other => {
                error!(error = %other, "Database failure");
                ApiError::Internal
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailExists => ApiError::Conflict("email already registered"),
            IdentityError::InvalidCredentials => ApiError::Unauthenticated("invalid email or password"),
            IdentityError::UserNotFound => ApiError::NotFound("user not found"),
            IdentityError::InvalidCode => ApiError::invalid("invalid or expired code"),
            IdentityError::Remote(cause) => {
                error!(error = %cause, "Identity provider failure");
                ApiError::Internal
            }
        }
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        error!(error = %err, "Mail delivery failure");
        ApiError::Internal
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        error!(error = %err, "Push notification failure");
        ApiError::Internal
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingIdentity => ApiError::Unauthenticated("missing user_id header"),
            AuthError::Forbidden => ApiError::Forbidden,
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge;
        }
        ApiError::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid(rejection.body_text())
    }
}
