use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::{CsvServiceError, Result};

/// An outbound message carrying a single file attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachment: Vec<u8>,
    pub attachment_filename: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers the message; any failure is a `DeliveryFailure`.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Only logs what would have been sent. Used when no relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            "Notification to {} ({}): {} [{} bytes as {}]",
            notification.recipient,
            notification.subject,
            notification.body,
            notification.attachment.len(),
            notification.attachment_filename
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content_base64: String,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    attachments: Vec<RelayAttachment<'a>>,
}

/// Posts messages as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: Url,
    sender: String,
    token: Option<String>,
}

impl HttpMailer {
    pub fn new(endpoint: &str, sender: impl Into<String>, token: Option<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| CsvServiceError::ConfigError {
            message: format!("Invalid mail relay URL: {}", e),
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            sender: sender.into(),
            token,
        })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            "Sending notification '{}' to {} via {}",
            notification.subject, notification.recipient, self.endpoint
        );

        let message = RelayMessage {
            from: &self.sender,
            to: vec![notification.recipient.as_str()],
            subject: &notification.subject,
            text: &notification.body,
            attachments: vec![RelayAttachment {
                filename: &notification.attachment_filename,
                content_type: "text/csv",
                content_base64: STANDARD.encode(&notification.attachment),
            }],
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CsvServiceError::DeliveryFailure {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CsvServiceError::DeliveryFailure {
                message: format!("mail relay responded with {}: {}", status, detail),
            });
        }

        Ok(())
    }
}
