//! Delivery Gateway boundary: hands a finished newsletter to a mail provider.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use crate::error::DeliveryError;
use crate::model::NewsletterArtifact;

/// One message to one recipient
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub subject: String,
    pub html: String,
    pub recipient: String,
    pub sender: String,
    pub reply_to: Option<String>,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<()>;
}

/// `"<name> - <Month DD, YYYY>"`
pub fn subject_line(newsletter_name: &str, date: NaiveDate) -> String {
    format!("{} - {}", newsletter_name, date.format("%B %d, %Y"))
}

/// Send the artifact to every recipient, one request each. The artifact on
/// disk is left untouched whatever happens here.
pub async fn deliver(
    mailer: &dyn Mailer,
    artifact: &NewsletterArtifact,
    subject: &str,
    sender: &str,
    reply_to: Option<&str>,
    recipients: &[String],
) -> Result<Vec<String>, DeliveryError> {
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for recipient in recipients {
        let request = SendRequest {
            subject: subject.to_string(),
            html: artifact.html.clone(),
            recipient: recipient.clone(),
            sender: sender.to_string(),
            reply_to: reply_to.map(str::to_string),
        };
        match mailer.send(&request).await {
            Ok(()) => {
                info!("Newsletter sent to {}", recipient);
                delivered.push(recipient.clone());
            }
            Err(e) => {
                error!("Failed to send newsletter to {}: {:#}", recipient, e);
                failed.push(recipient.clone());
            }
        }
    }

    if failed.is_empty() {
        Ok(delivered)
    } else {
        Err(DeliveryError::Failed {
            failed,
            artifact: artifact.path.clone(),
        })
    }
}

/// SendGrid v3 `mail/send`
pub struct SendGridMailer {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SendGridMailer {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build mail client")?;
        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, request: &SendRequest) -> Result<()> {
        let mut body = json!({
            "personalizations": [{ "to": [{ "email": request.recipient }] }],
            "from": { "email": request.sender },
            "subject": request.subject,
            "content": [{ "type": "text/html", "value": request.html }],
        });
        if let Some(reply_to) = &request.reply_to {
            body["reply_to"] = json!({ "email": reply_to });
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("mail request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("mail API returned {}: {}", status, text));
        }
        info!("Email accepted by provider (status {})", status.as_u16());
        Ok(())
    }
}
