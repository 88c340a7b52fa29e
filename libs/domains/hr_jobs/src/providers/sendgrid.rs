//! SendGrid email provider.

use super::{EmailProvider, OutgoingEmail, SentEmail};
use crate::error::{HrJobError, HrJobResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

/// SendGrid API configuration.
#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    /// Defaults to the production API.
    pub api_url: String,
}

impl SendGridConfig {
    pub fn new(api_key: String, from_email: String, from_name: String) -> Self {
        Self {
            api_key,
            from_email,
            from_name,
            api_url: "https://api.sendgrid.com/v3".to_string(),
        }
    }

    /// Read `SENDGRID_API_KEY`, `SENDGRID_FROM_EMAIL` and optional `SENDGRID_FROM_NAME`.
    pub fn from_env() -> HrJobResult<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| HrJobError::Config("SENDGRID_API_KEY not set".to_string()))?;
        let from_email = std::env::var("SENDGRID_FROM_EMAIL")
            .map_err(|_| HrJobError::Config("SENDGRID_FROM_EMAIL not set".to_string()))?;
        let from_name = std::env::var("SENDGRID_FROM_NAME").unwrap_or_else(|_| "HR Team".to_string());

        Ok(Self::new(api_key, from_email, from_name))
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// SendGrid email provider.
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn from_env() -> HrJobResult<Self> {
        Ok(Self::new(SendGridConfig::from_env()?))
    }

    fn build_request(&self, email: &OutgoingEmail) -> SendGridRequest {
        let addresses = |list: &[String]| -> Vec<EmailAddress> {
            list.iter()
                .map(|addr| EmailAddress {
                    email: addr.clone(),
                    name: None,
                })
                .collect()
        };

        let from = match &email.from {
            Some(from) => EmailAddress {
                email: from.clone(),
                name: None,
            },
            None => EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(self.config.from_name.clone()),
            },
        };

        SendGridRequest {
            personalizations: vec![Personalization {
                to: addresses(&email.to),
                cc: addresses(&email.cc),
                bcc: addresses(&email.bcc),
            }],
            from,
            subject: email.subject.clone(),
            content: vec![
                Content {
                    content_type: "text/plain".to_string(),
                    value: email.text.clone(),
                },
                Content {
                    content_type: "text/html".to_string(),
                    value: email.html.clone(),
                },
            ],
        }
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &OutgoingEmail) -> HrJobResult<SentEmail> {
        let request = self.build_request(email);

        debug!(
            to = ?email.to,
            subject = %email.subject,
            cc_count = email.cc.len(),
            bcc_count = email.bcc.len(),
            "Sending email via SendGrid"
        );

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| HrJobError::Provider(e.to_string()))?;

        let status = response.status();
        // SendGrid answers 202 with the id in a header; keep a local id if it is missing
        let id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if status.is_success() {
            info!(to = ?email.to, message_id = %id, "Email sent successfully via SendGrid");
            return Ok(SentEmail { id });
        }

        let body = response.text().await.unwrap_or_default();
        error!(to = ?email.to, status = %status, error = %body, "Failed to send email via SendGrid");

        let message = match serde_json::from_str::<SendGridError>(&body) {
            Ok(parsed) => parsed
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => body,
        };

        Err(HrJobError::Provider(format!("SendGrid error ({}): {}", status, message)))
    }

    fn name(&self) -> &'static str {
        "SendGrid"
    }

    async fn health_check(&self) -> HrJobResult<bool> {
        // No health endpoint; validate the key format instead
        if self.config.api_key.starts_with("SG.") {
            Ok(true)
        } else {
            Err(HrJobError::Config("Invalid SendGrid API key format".to_string()))
        }
    }
}
