use async_trait::async_trait;
use serde::Serialize;

use super::{EmailMessage, NotificationSender, NotifyError};

#[derive(Debug, Clone)]
pub struct ResendSender {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

#[derive(Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl ResendSender {
    pub fn new(api_key: impl Into<String>, api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for ResendSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&SendEmailBody {
                from: &message.from,
                to: [&message.to],
                subject: &message.subject,
                text: &message.body,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
