//! Registration, login and the emailed account-action flows.

use super::{claim, ensure_unowned, present, release, require_key, ApiError, AppState, Unique};
use crate::auth::random_profile_image;
use crate::extract::JsonBody;
use crate::mail::{password_reset_email, verification_email, Email};
use crate::models::*;
use crate::store;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::{error, info, warn};

/// Shortest password accepted at registration and reset
pub const MIN_PASSWORD_LEN: usize = 6;

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid("password must be at least 6 characters"));
    }
    Ok(())
}

/// POST /register - Create an identity record and its user document
pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let email = req.email.trim().to_string();
    validate_email(&email).map_err(ApiError::invalid)?;
    check_password(&req.password)?;

    let username = present(req.username.as_deref()).map(str::to_string);
    if let Some(name) = &username {
        validate_username(name).map_err(ApiError::invalid)?;
    }
    let phone = present(req.phone_number.as_deref()).map(str::to_string);
    let child_dob = match present(req.child_dob.as_deref()) {
        Some(raw) => Some(
            parse_child_dob(raw, Utc::now().date_naive())
                .map_err(ApiError::invalid)?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        None => None,
    };

    let db = state.db.as_ref();
    if let Some(name) = &username {
        ensure_unowned(db, Unique::Username, name, None).await?;
    }
    if let Some(number) = &phone {
        ensure_unowned(db, Unique::Phone, number, None).await?;
    }

    let credential = state.credential(&email, &req.password).await?;
    let uid = state.identity.create_user(&email, &credential).await?;

    if let Err(err) = claim_indexes(&state, &uid, username.as_deref(), phone.as_deref()).await {
        warn!(uid = %uid, "Registration lost a uniqueness race, rolling back");
        roll_back(&state, &uid, username.as_deref(), phone.as_deref()).await;
        return Err(err);
    }

    let role = if state.config.is_admin_email(&email) {
        Role::Admin
    } else {
        Role::User
    };
    let profile_image = random_profile_image();
    let user = User {
        email: Some(email.clone()),
        role,
        username,
        phone_number: phone,
        name: present(req.name.as_deref()).map(str::to_string),
        gender: req.gender,
        city: present(req.city.as_deref()).map(str::to_string),
        child_dob,
        profile_image: Some(profile_image),
    };
    store::write(db, &format!("users/{uid}"), &user).await?;

    let verification_email_sent = match send_verification(&state, &email).await {
        Ok(()) => true,
        Err(_) => {
            warn!(uid = %uid, "Verification email not sent");
            false
        }
    };

    info!(uid = %uid, role = ?role, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            uid,
            role,
            profile_image,
            verification_email_sent,
        }),
    ))
}

async fn claim_indexes(
    state: &AppState,
    uid: &str,
    username: Option<&str>,
    phone: Option<&str>,
) -> Result<(), ApiError> {
    if let Some(name) = username {
        claim(state.db.as_ref(), Unique::Username, name, uid).await?;
    }
    if let Some(number) = phone {
        claim(state.db.as_ref(), Unique::Phone, number, uid).await?;
    }
    Ok(())
}

/// Undo a half-finished registration; failures are logged only
async fn roll_back(state: &AppState, uid: &str, username: Option<&str>, phone: Option<&str>) {
    let db = state.db.as_ref();
    if let Some(name) = username {
        if release(db, Unique::Username, name, uid).await.is_err() {
            error!(uid, "Could not release username claim");
        }
    }
    if let Some(number) = phone {
        if release(db, Unique::Phone, number, uid).await.is_err() {
            error!(uid, "Could not release phone claim");
        }
    }
    if let Err(e) = state.identity.delete_user(uid).await {
        error!(uid, error = %e, "Could not delete orphaned identity record");
    }
}

async fn deliver(state: &AppState, to: &str, email: Email) -> Result<(), ApiError> {
    state.mailer.send(to, &email.subject, &email.html).await?;
    Ok(())
}

async fn send_verification(state: &AppState, email: &str) -> Result<(), ApiError> {
    let link = state.identity.verification_link(email).await?;
    deliver(state, email, verification_email(&link)).await
}

/// POST /login - Check credentials and return the profile summary
pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::invalid("email and password are required"));
    }

    let credential = state.credential(email, &req.password).await?;
    let session = state.identity.authenticate(email, &credential).await?;
    if !session.email_verified {
        return Err(ApiError::Unauthenticated("email not verified"));
    }

    let user: User = store::read(state.db.as_ref(), &format!("users/{}", session.uid))
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;

    info!(uid = %session.uid, "User logged in");

    Ok(Json(LoginResponse {
        uid: session.uid,
        role: user.role,
        username: user.username,
        profile_image: user.profile_image,
    }))
}

/// POST /delete_account - Remove the identity record, indexes and document
pub async fn delete_account(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<DeleteAccountRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let uid = require_key(Some(req.uid.as_str()), "uid")?;

    state.identity.delete_user(uid).await?;

    let db = state.db.as_ref();
    let path = format!("users/{uid}");
    if let Some(user) = store::read::<User>(db, &path).await? {
        if let Some(name) = &user.username {
            release(db, Unique::Username, name, uid).await?;
        }
        if let Some(number) = &user.phone_number {
            release(db, Unique::Phone, number, uid).await?;
        }
    }
    db.delete(&path).await?;

    info!(uid, "Account deleted");
    Ok(Json(MessageResponse {
        message: "account deleted",
    }))
}

fn required_email(req: &EmailRequest) -> Result<&str, ApiError> {
    present(Some(req.email.as_str())).ok_or_else(|| ApiError::invalid("email is required"))
}

/// POST /forget-password - Email a password reset link
pub async fn forget_password(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = required_email(&req)?;
    let link = state.identity.password_reset_link(email).await?;
    deliver(&state, email, password_reset_email(&link)).await?;
    Ok(Json(MessageResponse {
        message: "password reset email sent",
    }))
}

/// POST /resend-verification - Email a fresh verification link
pub async fn resend_verification(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = required_email(&req)?;
    send_verification(&state, email).await?;
    Ok(Json(MessageResponse {
        message: "verification email sent",
    }))
}

/// POST /reset-password - Complete a reset with the derived credential
pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = present(Some(req.email.as_str())).ok_or_else(|| ApiError::invalid("email is required"))?;
    let code = present(Some(req.oob_code.as_str())).ok_or_else(|| ApiError::invalid("oob_code is required"))?;
    check_password(&req.new_password)?;

    // The credential is salted with the email, so it must be the account's own
    let account_email = state.identity.reset_code_email(code).await?;
    if !account_email.trim().eq_ignore_ascii_case(email) {
        warn!("Password reset refused: email does not match the reset code");
        return Err(ApiError::invalid("email does not match the reset code"));
    }

    let credential = state.credential(&account_email, &req.new_password).await?;
    state.identity.confirm_password_reset(code, &credential).await?;

    Ok(Json(MessageResponse {
        message: "password updated",
    }))
}
