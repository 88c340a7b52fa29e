//! Email provider implementations.
//!
//! The email handler talks to an [`EmailProvider`]; SendGrid is used in
//! production and plain SMTP (Mailpit/MailHog) in development.

mod sendgrid;
mod smtp;

pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::HrJobResult;
use async_trait::async_trait;

/// A message accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Provider-specific message id.
    pub id: String,
}

/// Email content ready for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Sender override; providers fall back to their configured sender.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    /// Plain-text alternative.
    pub text: String,
}

/// Trait for email sending providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email, returning the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> HrJobResult<SentEmail>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Check that the provider is configured and reachable.
    async fn health_check(&self) -> HrJobResult<bool>;
}
