//! Credential derivation and the admin gate.
//!
//! # Credentials
//!
//! The raw password never leaves this process. The identity provider
//! receives `PBKDF2-HMAC-SHA256(password, pepper || lowercase(email))`,
//! hex-encoded. The salt is deterministic per account so the same password
//! derives the same credential at login.
//!
//! # Admin gate
//!
//! Admin-only endpoints identify the caller through the `user_id` header and
//! read `users/{id}/role` from the store. Any role other than `"admin"`,
//! including one this build does not know, is refused.

use crate::store::{self, Database, DbError};
use axum::http::HeaderMap;
use ring::pbkdf2;
use serde_json::Value;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use tracing::warn;

/// Header carrying the caller's UID on admin endpoints
pub const USER_ID_HEADER: &str = "user_id";

/// Stored role value that passes the admin gate
const ADMIN_ROLE: &str = "admin";

/// Derived credential length in bytes (hex doubles it)
const CREDENTIAL_LEN: usize = 32;

/// Derive the credential sent to the identity provider
pub fn derive_credential(email: &str, password: &str, pepper: &str, iterations: u32) -> String {
    let iterations = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);
    let mut salt = Vec::with_capacity(pepper.len() + email.len());
    salt.extend_from_slice(pepper.as_bytes());
    salt.extend_from_slice(email.trim().to_lowercase().as_bytes());

    let mut out = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &mut out,
    );
    hex::encode(out)
}

/// Random profile image index in `1..=10`
pub fn random_profile_image() -> u8 {
    let mut byte = [0u8; 1];
    // 250 is the largest multiple of 10 below 256; reject above it to stay uniform
    loop {
        if SystemRandom::new().fill(&mut byte).is_err() {
            return 1;
        }
        if byte[0] < 250 {
            return byte[0] % 10 + 1;
        }
    }
}

/// Admin gate errors
#[derive(Debug)]
pub enum AuthError {
    /// No `user_id` header
    MissingIdentity,
    /// Caller is unknown or not an admin
    Forbidden,
    /// Role lookup failed
    Store(DbError),
}

/// Extract the caller UID from the `user_id` header
pub fn caller_id(headers: &HeaderMap) -> Result<String, AuthError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingIdentity)
}

/// Require the caller to hold the admin role; returns the caller UID
pub async fn require_admin(db: &dyn Database, headers: &HeaderMap) -> Result<String, AuthError> {
    let uid = caller_id(headers)?;
    if !store::valid_key(&uid) {
        warn!(uid = %uid, "Admin action refused for malformed user id");
        return Err(AuthError::Forbidden);
    }
    let role = db
        .get(&format!("users/{uid}/role"))
        .await
        .map_err(AuthError::Store)?;
    if role.as_ref().and_then(Value::as_str) != Some(ADMIN_ROLE) {
        warn!(uid = %uid, "Admin action refused");
        return Err(AuthError::Forbidden);
    }
    Ok(uid)
}
