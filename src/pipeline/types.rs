//! Shared types and capability traits for the processing pipeline.

use async_trait::async_trait;

use crate::attachments::AttachmentRecord;
use crate::error::{DeliveryError, LlmError, MailboxError, PipelineError};

// ── Envelope ────────────────────────────────────────────────────────

/// One fetched message paired with its mailbox-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Mailbox identifier (IMAP UID), opaque to the pipeline.
    pub uid: String,
    /// Raw RFC 5322 message: headers, body and all MIME parts.
    pub raw: Vec<u8>,
}

impl MessageEnvelope {
    pub fn new(uid: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            uid: uid.into(),
            raw: raw.into(),
        }
    }

    /// Parse the raw bytes into a MIME tree borrowing from this envelope.
    pub fn parse(&self) -> Result<mail_parser::Message<'_>, PipelineError> {
        mail_parser::MessageParser::default()
            .parse(&self.raw)
            .ok_or(PipelineError::Unparseable)
    }
}

// ── Reply ───────────────────────────────────────────────────────────

/// Structured reply produced by the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyResult {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Terminal state of one successfully processed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// Reply sent, message removed from the mailbox and recorded.
    Deleted,
    /// Reply sent, message left in place by queue policy.
    Retained,
}

/// Counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub deleted: usize,
    pub retained: usize,
    pub failed: usize,
}

// ── Capabilities ────────────────────────────────────────────────────

/// Mailbox access: fetch trusted messages, remove handled ones.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch every message whose From header matches a trusted sender, in mailbox order.
    async fn fetch_messages(
        &self,
        trusted_senders: &[String],
    ) -> Result<Vec<MessageEnvelope>, MailboxError>;

    /// Permanently remove a message.
    async fn delete_message(&self, uid: &str) -> Result<(), MailboxError>;

    /// Best-effort notice that a message failed; it stays in the mailbox.
    async fn mark_failed(&self, uid: &str);
}

/// Outbound mail delivery.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Language-model reply generation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(
        &self,
        body_text: &str,
        attachments: &[AttachmentRecord],
    ) -> Result<ReplyResult, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_raw_message() {
        let envelope = MessageEnvelope::new(
            "17",
            "From: Alice <alice@example.com>\r\nSubject: Hi\r\n\r\nHello\r\n",
        );
        let message = envelope.parse().unwrap();
        assert_eq!(message.subject(), Some("Hi"));
    }

    #[test]
    fn run_summary_defaults_to_zero() {
        let summary = RunSummary::default();
        assert_eq!(summary.fetched + summary.deleted + summary.retained + summary.failed, 0);
    }
}
