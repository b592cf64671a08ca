//! Transactional email: templates, the HTTPS relay client and an in-memory outbox.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Mail errors
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay not configured")]
    NotConfigured,

    #[error("mail relay request failed: {0}")]
    Remote(String),
}

/// Outbound email sender
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

const SOCIAL_LINKS: &str = r#"<p>💡 Follow us on <a href="https://www.instagram.com/wegrowparenting">Instagram</a> and <a href="https://youtube.com/@wegrowparenting">YouTube</a> for daily parenting tips &amp; support!</p>"#;

/// Welcome + verification message
pub fn verification_email(link: &str) -> Email {
    Email {
        subject: "Welcome to We Grow Family! 💚".to_string(),
        html: format!(
            "<p>Dear Family Member,</p>\
             <p>Congratulations on starting this beautiful journey of Parenthood! \
             We're here to support you at every step of the way. \
             Verify your email below to start exploring.</p>\
             <p><a href=\"{link}\">🔗 Verify Your Email</a></p>\
             {SOCIAL_LINKS}\
             <p>Happy Parenting! 🌿💚</p>"
        ),
    }
}

/// Password reset message
pub fn password_reset_email(link: &str) -> Email {
    Email {
        subject: "Reset Your Password - We Grow".to_string(),
        html: format!(
            "<p>Dear We Grow Family Member,</p>\
             <p>Sometimes passwords slip our minds. You can reset yours by clicking the link below.</p>\
             <p><a href=\"{link}\">🔗 Reset Your Password</a></p>\
             {SOCIAL_LINKS}\
             <p>Warm regards,<br/>We Grow Team 🌿💚</p>"
        ),
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Mailer posting JSON to an HTTPS mail relay
pub struct HttpMailer {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(url: String, api_key: Option<String>, from: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        let mut request = self.http.post(&self.url).json(&RelayMessage {
            from: &self.from,
            to,
            subject,
            html: html_body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Remote(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Remote(format!("relay answered {status}")));
        }

        debug!("Email handed to relay");
        Ok(())
    }
}

/// Mailer that keeps messages in memory (development and tests)
#[derive(Clone, Default)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    fail: bool,
}

/// A message captured by [`Outbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// An outbox whose every send fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages captured so far
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::NotConfigured);
        }
        info!(subject, "Email captured in memory outbox");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html_body.to_string(),
            });
        }
        Ok(())
    }
}
