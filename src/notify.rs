//! Topic push notifications (Firebase Cloud Messaging).
//!
//! Broadcasts are fire-and-forget from the subscriber's point of view: one
//! request per topic, no per-device fan-out and no retry.

use crate::config::Config;
use crate::firebase::AccessToken;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("push messaging not configured")]
    NotConfigured,

    #[error("push request failed: {0}")]
    Remote(String),
}

/// Push messaging provider
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Broadcast a notification to every subscriber of `topic`
    async fn send_to_topic(&self, topic: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Serialize)]
struct Message<'a> {
    topic: &'a str,
    notification: Notification<'a>,
}

#[derive(Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

/// FCM HTTP v1 client
pub struct FcmClient {
    http: reqwest::Client,
    project_id: Option<String>,
    access_token: Option<AccessToken>,
}

impl FcmClient {
    /// Create a new FCM client from configuration
    pub fn new(config: &Config) -> Self {
        let access_token = AccessToken::from_config(config);
        if config.firebase_project_id.is_none() || access_token.is_none() {
            warn!("FCM not configured - topic broadcasts will fail");
        }
        let http = reqwest::Client::builder()
            .timeout(config.remote_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            project_id: config.firebase_project_id.clone(),
            access_token,
        }
    }

    /// Check if FCM is enabled
    pub fn is_enabled(&self) -> bool {
        self.project_id.is_some() && self.access_token.is_some()
    }
}

#[async_trait]
impl Notifier for FcmClient {
    async fn send_to_topic(&self, topic: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let (Some(project_id), Some(source)) = (&self.project_id, &self.access_token) else {
            return Err(NotifyError::NotConfigured);
        };
        let token = source
            .current()
            .await
            .map_err(|e| NotifyError::Remote(e.to_string()))?;

        let url = format!("https://fcm.googleapis.com/v1/projects/{project_id}/messages:send");
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&SendRequest {
                message: Message {
                    topic,
                    notification: Notification { title, body },
                },
            })
            .send()
            .await
            .map_err(|e| NotifyError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Remote(format!("FCM answered {status}")));
        }

        debug!(topic, "Sent topic notification");
        Ok(())
    }
}

/// A broadcast captured by [`MemoryNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub topic: String,
    pub title: String,
    pub body: String,
}

/// Notifier that records broadcasts in memory (development and tests)
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Broadcast>>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every broadcast fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Broadcasts recorded so far
    pub fn sent(&self) -> Vec<Broadcast> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send_to_topic(&self, topic: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Remote("simulated outage".to_string()));
        }
        info!(topic, title, "Topic notification recorded");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Broadcast {
                topic: topic.to_string(),
                title: title.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

/// Title and body announcing a newly saved video
pub fn new_video_message(title: &str, creator: &str) -> (String, String) {
    (
        format!("New Video Posted: {title}"),
        format!("Check out {creator}'s latest video on {title}!"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_video_message_format() {
        let (title, body) = new_video_message("Sleep routines", "Dr. Rao");
        assert_eq!(title, "New Video Posted: Sleep routines");
        assert_eq!(body, "Check out Dr. Rao's latest video on Sleep routines!");
    }

    #[tokio::test]
    async fn unconfigured_fcm_refuses_to_send() {
        let config = Config {
            firebase_project_id: None,
            firebase_access_token: None,
            firebase_access_token_file: None,
            ..Config::default()
        };
        let client = FcmClient::new(&config);
        assert!(!client.is_enabled());
        assert!(matches!(
            client.send_to_topic("t", "a", "b").await,
            Err(NotifyError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.send_to_topic("new-videos", "t", "b").await.unwrap();
        assert_eq!(
            notifier.sent(),
            vec![Broadcast {
                topic: "new-videos".to_string(),
                title: "t".to_string(),
                body: "b".to_string(),
            }]
        );
        assert!(MemoryNotifier::failing().send_to_topic("x", "t", "b").await.is_err());
    }
}
