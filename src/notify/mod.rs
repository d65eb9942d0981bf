//! Notification boundary: order messages for customers and store staff.

use async_trait::async_trait;
use thiserror::Error;

pub mod messages;
pub mod resend;

pub use resend::ResendSender;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail provider responded with status {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "mail delivery disabled, message logged only"
        );
        tracing::debug!(body = %message.body, "undelivered message body");
        Ok(())
    }
}
