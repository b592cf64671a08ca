//! Request extractors whose rejections render as [`ApiError`] bodies.

use crate::handlers::ApiError;
use axum::extract::{FromRequest, FromRequestParts};

/// JSON body; malformed or mistyped bodies become `400 {"error": ...}`
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// Query string; undecodable parameters become `400 {"error": ...}`
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);
