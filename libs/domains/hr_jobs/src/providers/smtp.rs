//! SMTP email provider using lettre.
//!
//! Meant for local development against Mailpit/MailHog, or a relay with TLS.

use super::{EmailProvider, OutgoingEmail, SentEmail};
use crate::error::{HrJobError, HrJobResult};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_email: String,
    pub from_name: String,
    /// Optional for dev servers.
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    /// Development defaults (`localhost:1025`), overridable via `SMTP_*`.
    pub fn mailhog() -> Self {
        Self {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1025),
            from_email: std::env::var("SMTP_FROM_EMAIL").unwrap_or_else(|_| "noreply@localhost".to_string()),
            from_name: std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "HR Dev".to_string()),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> HrJobResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self { transport, config })
    }

    pub fn mailhog() -> HrJobResult<Self> {
        Self::new(SmtpConfig::mailhog())
    }

    fn build_transport(config: &SmtpConfig) -> HrJobResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| HrJobError::Provider(format!("Failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn mailbox(address: &str, role: &str) -> HrJobResult<Mailbox> {
        address
            .parse()
            .map_err(|e| HrJobError::Provider(format!("Invalid {} address '{}': {}", role, address, e)))
    }

    fn build_message(&self, email: &OutgoingEmail) -> HrJobResult<Message> {
        let from = match &email.from {
            Some(from) => Self::mailbox(from, "from")?,
            None => Self::mailbox(&format!("{} <{}>", self.config.from_name, self.config.from_email), "from")?,
        };

        let mut builder = Message::builder().from(from).subject(&email.subject);
        for to in &email.to {
            builder = builder.to(Self::mailbox(to, "to")?);
        }
        for cc in &email.cc {
            builder = builder.cc(Self::mailbox(cc, "CC")?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(Self::mailbox(bcc, "BCC")?);
        }

        builder
            .message_id(Some(format!("<{}@{}>", Uuid::new_v4(), self.config.host)))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| HrJobError::Provider(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &OutgoingEmail) -> HrJobResult<SentEmail> {
        debug!(
            to = ?email.to,
            subject = %email.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;
        let id = message
            .headers()
            .get_raw("Message-ID")
            .map(|s| s.to_string())
            .unwrap_or_default();

        self.transport.send(message).await.map_err(|e| {
            error!(to = ?email.to, error = %e, "Failed to send email via SMTP");
            HrJobError::Provider(format!("SMTP send failed: {}", e))
        })?;

        info!(to = ?email.to, message_id = %id, "Email sent successfully via SMTP");
        Ok(SentEmail { id })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> HrJobResult<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| HrJobError::Provider(format!("SMTP health check failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SmtpProvider {
        SmtpProvider::new(SmtpConfig::new(
            "localhost".to_string(),
            1025,
            "noreply@company.com".to_string(),
            "HR".to_string(),
        ))
        .unwrap()
    }

    #[test]
    fn test_smtp_config_with_tls() {
        let config = SmtpConfig::new(
            "smtp.example.com".to_string(),
            587,
            "hr@example.com".to_string(),
            "HR".to_string(),
        )
        .with_tls(true)
        .with_credentials("user".to_string(), "pass".to_string());

        assert!(config.use_tls);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("pass"));
    }

    #[tokio::test]
    async fn test_build_message_with_multiple_recipients() {
        let email = OutgoingEmail {
            to: vec!["a@b.com".to_string(), "c@d.com".to_string()],
            bcc: vec!["audit@company.com".to_string()],
            subject: "Leave Request Approved".to_string(),
            html: "<p>Approved</p>".to_string(),
            text: "Approved".to_string(),
            ..Default::default()
        };

        let message = provider().build_message(&email).unwrap();
        assert_eq!(message.envelope().to().len(), 3);
        assert!(message.headers().get_raw("Message-ID").is_some());
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_address() {
        let email = OutgoingEmail {
            to: vec!["not an address".to_string()],
            ..Default::default()
        };
        assert!(matches!(provider().build_message(&email), Err(HrJobError::Provider(_))));
    }
}
