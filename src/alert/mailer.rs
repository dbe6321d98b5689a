//! Mail delivery via an HTTP mail API.
//!
//! Transport details (endpoint, token, sender, recipients) come from
//! configuration; this client only knows how to hand a subject and body to
//! the relay and report success or failure.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MailConfig;

/// Notification delivery error.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("mail request failed: {0}")]
    Transport(String),
    #[error("mail API returned status {0}")]
    Status(u16),
}

/// Something that can deliver a notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Notifier that POSTs messages to a JSON mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    cfg: MailConfig,
}

impl HttpMailer {
    pub fn new(cfg: MailConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client, cfg })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = serde_json::json!({
            "from": self.cfg.from,
            "to": self.cfg.to,
            "subject": subject,
            "text": body,
        });

        let mut request = self.client.post(&self.cfg.api_url).json(&message);
        if let Some(token) = &self.cfg.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}
