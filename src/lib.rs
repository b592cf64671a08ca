//! # WeGrow Backend
//!
//! REST backend for the WeGrow parenting community: accounts and profiles,
//! a social feed, curated videos, tips, a contest and push broadcasts.
//!
//! ## Design Principles
//!
//! - **Stateless handlers**: all data lives in an external document store
//! - **Injected collaborators**: store, identity, mail and push sit behind traits
//! - **Derived credentials**: raw passwords never leave the process
//! - **Atomic updates**: counters, reactions and unique fields use conditional writes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌───────────────────┐
//! │  Mobile app  │────▶│   Backend   │────▶│ Realtime Database │
//! └──────────────┘     └─────────────┘     └───────────────────┘
//!                             │
//!              ┌──────────────┼──────────────┐
//!              │              │              │
//!          Identity      Mail relay         FCM
//!          Toolkit                        (topics)
//! ```
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/register` | POST | Create account, send verification |
//! | `/login` | POST | Authenticate a verified account |
//! | `/forget-password` | POST | Email a reset link |
//! | `/resend-verification` | POST | Email a new verification link |
//! | `/reset-password` | POST | Set a new password from a reset code |
//! | `/delete_account` | POST | Delete identity and profile |
//! | `/enter_data` | POST | Fill in profile details |
//! | `/username` | POST | Change username |
//! | `/profile` | GET | Profile by uid |
//! | `/profile_image` | GET | Avatar index by username |
//! | `/posts` | POST / GET | Create post / page of posts |
//! | `/posts/tags` | GET | Page filtered by tags |
//! | `/posts/username` | GET | Page filtered by author |
//! | `/posts/comment` | POST | Comment on a post |
//! | `/posts/like` | POST | Toggle post like |
//! | `/posts/flag` | POST / GET | Flag post / flagged posts |
//! | `/comments/like` | POST | Toggle comment like |
//! | `/comments/flag` | POST / GET | Flag comment / flagged comments |
//! | `/videos` | POST / GET | Save (admin) / list videos |
//! | `/videos/top` | POST / GET | Save (admin) / list top videos |
//! | `/tips` | POST / GET | Replace (admin) / read tips |
//! | `/contest` | POST / GET | Replace (admin) / read contest |
//! | `/custom-notif` | POST | Broadcast (admin) |

pub mod auth;
pub mod config;
pub mod extract;
pub mod feed;
pub mod firebase;
pub mod handlers;
pub mod identity;
pub mod mail;
pub mod models;
pub mod notify;
pub mod store;

pub use config::Config;
pub use handlers::AppState;
pub use store::MemoryStore;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use handlers::{account, content, feed as posts, profile};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Maximum request body size (64 KiB).
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Build the Axum router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Accounts
        .route("/register", post(account::register))
        .route("/login", post(account::login))
        .route("/forget-password", post(account::forget_password))
        .route("/resend-verification", post(account::resend_verification))
        .route("/reset-password", post(account::reset_password))
        .route("/delete_account", post(account::delete_account))
        // Profiles
        .route("/enter_data", post(profile::enter_data))
        .route("/username", post(profile::change_username))
        .route("/profile", get(profile::get_profile))
        .route("/profile_image", get(profile::get_profile_image))
        // Feed
        .route("/posts", post(posts::create_post).get(posts::list_posts))
        .route("/posts/tags", get(posts::posts_by_tags))
        .route("/posts/username", get(posts::posts_by_username))
        .route("/posts/comment", post(posts::add_comment))
        .route("/posts/like", post(posts::like_post))
        .route("/posts/flag", post(posts::flag_post).get(posts::flagged_posts))
        .route("/comments/like", post(posts::like_comment))
        .route("/comments/flag", post(posts::flag_comment).get(posts::flagged_comments))
        // Curated content
        .route("/videos", post(content::save_video).get(content::list_videos))
        .route("/videos/top", post(content::save_top_video).get(content::list_top_videos))
        .route("/tips", post(content::save_tip).get(content::get_tips))
        .route("/contest", post(content::save_contest).get(content::get_contest))
        .route("/custom-notif", post(content::custom_notification))
        // Enforced by the body extractors; oversized bodies are rejected with 413
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        // Middleware stack (first in the builder = outermost)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(preflight))
                .layer(cors_layer()),
        )
        .with_state(state)
}

/// Permissive CORS for the mobile and web clients
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static(auth::USER_ID_HEADER),
        ])
}

/// Every `OPTIONS` request is answered `204` with an empty body
async fn preflight(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.body_mut() = Body::empty();
    }
    response
}
