//! Configuration for the WeGrow backend.
//!
//! All configuration is loaded from environment variables (a `.env` file is
//! read first by `main`). Secrets are never logged.

use std::path::PathBuf;
use std::time::Duration;

/// Default topic that receives new-video broadcasts
pub const DEFAULT_NEW_VIDEO_TOPIC: &str = "new-videos";

/// Default PBKDF2 iteration count for derived credentials
pub const DEFAULT_CREDENTIAL_ITERATIONS: u32 = 100_000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Server port
    pub port: u16,

    // === Firebase ===
    /// Realtime Database root URL. When unset the in-memory backends are used.
    pub database_url: Option<String>,

    /// Web API key for the Identity Toolkit endpoints
    pub firebase_api_key: Option<String>,

    /// Project ID (FCM HTTP v1 path)
    pub firebase_project_id: Option<String>,

    /// OAuth2 bearer token for admin calls (database, account deletion, FCM).
    /// Expires after about an hour; prefer `firebase_access_token_file`.
    pub firebase_access_token: Option<String>,

    /// File holding the current bearer token, re-read on every admin call
    pub firebase_access_token_file: Option<PathBuf>,

    /// Identity Toolkit base URL
    pub identity_base_url: String,

    /// Continue URL embedded in verification and reset links
    pub action_url: String,

    // === Mail relay ===
    /// HTTPS endpoint accepting `{from, to, subject, html}`
    pub mail_api_url: Option<String>,

    /// Bearer key for the mail relay
    pub mail_api_key: Option<String>,

    /// Sender address
    pub mail_from: String,

    // === Accounts ===
    /// Secret mixed into the credential salt
    pub credential_pepper: String,

    /// PBKDF2 iterations for derived credentials
    pub credential_iterations: u32,

    /// Emails that receive the admin role at registration
    pub admin_emails: Vec<String>,

    // === Notifications ===
    /// Topic for new-video and default custom broadcasts
    pub new_video_topic: String,

    /// Timeout applied to every outbound request
    pub remote_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),

            database_url: non_empty_var("FIREBASE_DATABASE_URL"),
            firebase_api_key: non_empty_var("FIREBASE_API_KEY"),
            firebase_project_id: non_empty_var("FIREBASE_PROJECT_ID"),
            firebase_access_token: non_empty_var("FIREBASE_ACCESS_TOKEN"),
            firebase_access_token_file: non_empty_var("FIREBASE_ACCESS_TOKEN_FILE").map(PathBuf::from),
            identity_base_url: std::env::var("IDENTITY_BASE_URL")
                .unwrap_or_else(|_| "https://identitytoolkit.googleapis.com/v1".to_string()),
            action_url: std::env::var("ACTION_URL")
                .unwrap_or_else(|_| "https://wegrowparenting.com".to_string()),

            mail_api_url: non_empty_var("MAIL_API_URL"),
            mail_api_key: non_empty_var("MAIL_API_KEY"),
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@wegrowparenting.com".to_string()),

            credential_pepper: std::env::var("CREDENTIAL_PEPPER").unwrap_or_default(),
            credential_iterations: std::env::var("CREDENTIAL_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_CREDENTIAL_ITERATIONS),
            admin_emails: std::env::var("ADMIN_EMAILS")
                .map(|v| parse_email_list(&v))
                .unwrap_or_default(),

            new_video_topic: std::env::var("NEW_VIDEO_TOPIC")
                .unwrap_or_else(|_| DEFAULT_NEW_VIDEO_TOPIC.to_string()),
            remote_timeout: Duration::from_secs(
                std::env::var("REMOTE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
        }
    }

    /// Check if the Firebase backends are configured
    pub fn firebase_configured(&self) -> bool {
        self.database_url.is_some()
    }

    /// Check if the mail relay is configured
    pub fn mail_configured(&self) -> bool {
        self.mail_api_url.is_some()
    }

    /// Whether an email address is granted the admin role
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim();
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
        .collect()
}
