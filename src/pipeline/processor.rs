//! Mail processor: turns each trusted message into exactly one outcome.
//!
//! Flow per message:
//! 1. Parse MIME, extract body text and attachment text
//! 2. LLM reply generation → `{to, subject, body_text}`
//! 3. Send the reply (safe mode redirects it to the original sender)
//! 4. Delete from the mailbox and record, or retain per queue policy
//!
//! Any failure in 1–4 records the message as failed and moves on; only a
//! fetch failure or an unwritable failed ledger ends the run early.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::attachments::{AttachmentProcessor, AttachmentRecord, to_records};
use crate::config::AppConfig;
use crate::error::{Error, PipelineError};
use crate::ledger::StateLedger;
use crate::pipeline::message::{extract_plain_text, sender_address};
use crate::pipeline::types::{
    EnvelopeOutcome, MailSender, Mailbox, MessageEnvelope, ReplyGenerator, RunSummary,
};

/// Subject prefix used by test mode.
pub const TEST_SUBJECT_PREFIX: &str = "[MailAssist Test]";

const NO_SUBJECT: &str = "(no subject)";

/// Behavioural switches for a run.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub trusted_senders: Vec<String>,
    pub delete_after_success: bool,
    pub safe_mode: bool,
}

impl ProcessorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            trusted_senders: config.trusted_senders.clone(),
            delete_after_success: config.queue_policy.delete_after_success,
            safe_mode: config.safe_mode,
        }
    }
}

/// Owned view of a parsed message, ready for the async steps.
struct PreparedMessage {
    body_text: String,
    sender: Option<String>,
    subject: String,
    records: Vec<AttachmentRecord>,
    forwarded_attachments: Vec<String>,
}

/// Sequential mail processor.
pub struct MailProcessor {
    mailbox: Arc<dyn Mailbox>,
    sender: Arc<dyn MailSender>,
    generator: Arc<dyn ReplyGenerator>,
    attachments: AttachmentProcessor,
    ledger: StateLedger,
    options: ProcessorOptions,
}

impl MailProcessor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<dyn MailSender>,
        generator: Arc<dyn ReplyGenerator>,
        attachments: AttachmentProcessor,
        ledger: StateLedger,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            mailbox,
            sender,
            generator,
            attachments,
            ledger,
            options,
        }
    }

    /// Process every trusted message currently in the mailbox.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let envelopes = self
            .mailbox
            .fetch_messages(&self.options.trusted_senders)
            .await
            .map_err(PipelineError::Fetch)?;

        let mut summary = RunSummary {
            fetched: envelopes.len(),
            ..RunSummary::default()
        };
        info!(count = summary.fetched, "Fetched trusted messages");

        for envelope in &envelopes {
            match self.process_envelope(envelope).await {
                Ok(EnvelopeOutcome::Deleted) => summary.deleted += 1,
                Ok(EnvelopeOutcome::Retained) => summary.retained += 1,
                Err(e) => {
                    error!(uid = %envelope.uid, error = %e, "Failed to process message");
                    self.ledger
                        .record_failed(&envelope.uid, &e.to_string())
                        .await?;
                    self.mailbox.mark_failed(&envelope.uid).await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            fetched = summary.fetched,
            deleted = summary.deleted,
            retained = summary.retained,
            failed = summary.failed,
            "Run complete"
        );
        Ok(summary)
    }

    /// Handle one message end to end.
    pub async fn process_envelope(
        &self,
        envelope: &MessageEnvelope,
    ) -> Result<EnvelopeOutcome, PipelineError> {
        info!(uid = %envelope.uid, "Processing message");
        let prepared = self.prepare(envelope)?;

        let reply = self
            .generator
            .generate_reply(&prepared.body_text, &prepared.records)
            .await?;

        let recipient = self.determine_recipient(prepared.sender.as_deref(), &reply.recipient)?;
        self.sender
            .send_mail(&recipient, &reply.subject, &reply.body)
            .await?;
        info!(uid = %envelope.uid, to = %recipient, "Reply sent");

        self.handle_post_send(&envelope.uid, &prepared.forwarded_attachments)
            .await
    }

    /// Parse MIME and run attachment extraction, dropping all borrows.
    fn prepare(&self, envelope: &MessageEnvelope) -> Result<PreparedMessage, PipelineError> {
        let message = envelope.parse()?;
        let attachments = self.attachments.process(&message);
        let forwarded_attachments = attachments
            .iter()
            .filter(|a| !a.skipped())
            .map(|a| a.filename.clone())
            .collect();
        let prepared = PreparedMessage {
            body_text: extract_plain_text(&message),
            sender: sender_address(&message),
            subject: message.subject().unwrap_or_default().to_string(),
            records: to_records(&attachments),
            forwarded_attachments,
        };
        debug!(
            uid = %envelope.uid,
            subject = %prepared.subject,
            body_chars = prepared.body_text.len(),
            attachments = prepared.records.len(),
            "Message prepared"
        );
        Ok(prepared)
    }

    /// Pick the reply recipient.
    ///
    /// In safe mode the reply goes back to the original sender (or the first
    /// trusted sender when the From address does not parse); otherwise to
    /// the address the model chose.
    pub fn determine_recipient(
        &self,
        original_sender: Option<&str>,
        generated: &str,
    ) -> Result<String, PipelineError> {
        if !self.options.safe_mode {
            return Ok(generated.to_string());
        }
        if let Some(addr) = original_sender {
            debug!(to = %addr, "Safe mode: replying to original sender");
            return Ok(addr.to_string());
        }
        self.options
            .trusted_senders
            .first()
            .cloned()
            .ok_or_else(|| {
                PipelineError::NoRecipient(
                    "safe mode with unparsable sender and no trusted senders".into(),
                )
            })
    }

    async fn handle_post_send(
        &self,
        uid: &str,
        forwarded_attachments: &[String],
    ) -> Result<EnvelopeOutcome, PipelineError> {
        if !self.options.delete_after_success {
            info!(uid = %uid, "Message retained per queue policy");
            return Ok(EnvelopeOutcome::Retained);
        }

        self.mailbox
            .delete_message(uid)
            .await
            .map_err(PipelineError::Delete)?;
        let attachments = forwarded_attachments.join(",");
        self.ledger
            .record_deleted(uid, &[("attachments", attachments.as_str())])
            .await?;
        info!(uid = %uid, "Message deleted");
        Ok(EnvelopeOutcome::Deleted)
    }

    /// Forward the first trusted message back to its sender to check the setup.
    ///
    /// No reply generation, no deletion, no ledger writes. Returns `false`
    /// when the mailbox holds no trusted message.
    pub async fn run_test_mode(&self) -> Result<bool, Error> {
        let envelopes = self
            .mailbox
            .fetch_messages(&self.options.trusted_senders)
            .await
            .map_err(PipelineError::Fetch)?;

        let Some(envelope) = envelopes.first() else {
            warn!("No trusted messages found for test mode");
            return Ok(false);
        };

        let (body, subject, sender) = {
            let message = envelope.parse()?;
            (
                extract_plain_text(&message),
                format!(
                    "{TEST_SUBJECT_PREFIX} {}",
                    message.subject().unwrap_or(NO_SUBJECT)
                ),
                sender_address(&message),
            )
        };
        let recipient = match sender {
            Some(addr) => addr,
            None => self
                .options
                .trusted_senders
                .first()
                .cloned()
                .ok_or_else(|| PipelineError::NoRecipient("no trusted senders".into()))?,
        };

        self.sender
            .send_mail(&recipient, &subject, &body)
            .await
            .map_err(PipelineError::from)?;
        info!(uid = %envelope.uid, to = %recipient, "Test message forwarded");
        Ok(true)
    }
}
