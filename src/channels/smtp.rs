//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpSettings;
use crate::error::DeliveryError;
use crate::pipeline::types::MailSender;

/// [`MailSender`] over an authenticated SMTP relay.
///
/// `use_tls` selects STARTTLS on the configured port; otherwise the
/// connection uses implicit TLS from the first byte.
pub struct SmtpSender {
    settings: SmtpSettings,
}

impl SmtpSender {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn transport(&self) -> Result<SmtpTransport, DeliveryError> {
        let creds = Credentials::new(
            self.settings.username.clone(),
            self.settings.password.expose_secret().to_string(),
        );
        let builder = if self.settings.use_tls {
            SmtpTransport::starttls_relay(&self.settings.host)
        } else {
            SmtpTransport::relay(&self.settings.host)
        }
        .map_err(|e| DeliveryError::Relay(e.to_string()))?;

        Ok(builder
            .port(self.settings.port)
            .credentials(creds)
            .build())
    }
}

/// Build a plain-text UTF-8 message.
pub fn build_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<Message, DeliveryError> {
    let from_mbox = from.parse().map_err(|e: lettre::address::AddressError| {
        DeliveryError::InvalidAddress {
            role: "from",
            address: from.to_string(),
            reason: e.to_string(),
        }
    })?;
    let to_mbox = to.parse().map_err(|e: lettre::address::AddressError| {
        DeliveryError::InvalidAddress {
            role: "to",
            address: to.to_string(),
            reason: e.to_string(),
        }
    })?;

    Message::builder()
        .from(from_mbox)
        .to(to_mbox)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let email = build_message(self.settings.from_address(), to, subject, body)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("send task failed: {e}")))?
            .map_err(|e| DeliveryError::SendFailed(e.to_string()))?;

        tracing::info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}
