//! SMTP email channel (async lettre).

use async_trait::async_trait;

use blx_core::config::EmailConfig;
use blx_core::error::{BlxError, Result};
use blx_core::traits::EmailSender;

/// Sends booking emails over SMTP with STARTTLS. One transport is built
/// per send; notification volume is low enough that pooling never pays
/// for itself.
pub struct SmtpEmailSender {
    config: EmailConfig,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        if !self.config.enabled {
            return Err(BlxError::Channel("email channel disabled".into()));
        }

        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.display_name, self.config.from_address)
                .parse()
                .map_err(|e| BlxError::Channel(format!("invalid from address: {e}")))?;

        let to_mailbox: Mailbox =
            to.parse().map_err(|e| BlxError::Channel(format!("invalid to address: {e}")))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| BlxError::Channel(format!("build email: {e}")))?;

        let creds =
            Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| BlxError::Channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        mailer.send(email).await.map_err(|e| BlxError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("email sent to {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_channel_reports_failure() {
        let sender = SmtpEmailSender::new(EmailConfig::default());
        let err = sender.send("a@example.com", "hi", "<p>hi</p>").await.unwrap_err();
        assert!(matches!(err, BlxError::Channel(_)));
    }

    #[tokio::test]
    async fn malformed_recipient_rejected_before_connecting() {
        let config = EmailConfig { enabled: true, ..EmailConfig::default() };
        let sender = SmtpEmailSender::new(config);
        let err = sender.send("not an address", "hi", "<p>hi</p>").await.unwrap_err();
        assert!(err.to_string().contains("invalid to address"));
    }
}
