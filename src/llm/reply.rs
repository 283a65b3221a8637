//! Reply generation: prompt construction and structured response parsing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::attachments::AttachmentRecord;
use crate::error::LlmError;
use crate::pipeline::types::{ReplyGenerator, ReplyResult};

/// System preamble sent with every reply request.
pub const SYSTEM_PROMPT: &str = "\
You are an email assistant working on behalf of a trusted sender. \
Read the sender's email and the attachment summaries, then draft the outgoing \
email the sender is asking for. \
Respond with a single JSON object and nothing else, using exactly these keys:
- \"to\": recipient email address
- \"subject\": subject line
- \"body_text\": plain-text email body";

/// Placeholder used when a message carries no attachments.
const NO_ATTACHMENTS: &str = "(no attachments)";

/// Sends one prompt and returns the raw completion text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Provider label for logs and errors.
    fn provider(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// [`ReplyGenerator`] that prompts a completion backend for a JSON reply.
pub struct LlmReplyGenerator {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl LlmReplyGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate_reply(
        &self,
        body_text: &str,
        attachments: &[AttachmentRecord],
    ) -> Result<ReplyResult, LlmError> {
        let provider = self.backend.provider().to_string();
        let prompt = build_user_prompt(body_text, attachments);
        debug!(
            provider = %provider,
            prompt_chars = prompt.len(),
            attachments = attachments.len(),
            "Requesting reply"
        );

        let response = tokio::time::timeout(self.timeout, self.backend.complete(&prompt))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: provider.clone(),
                timeout: self.timeout,
            })??;

        let reply = parse_reply(&provider, &response)?;
        info!(provider = %provider, to = %reply.recipient, "Reply generated");
        Ok(reply)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the user prompt from the email body and attachment records.
pub fn build_user_prompt(body_text: &str, attachments: &[AttachmentRecord]) -> String {
    format!(
        "Trusted sender email body:\n{body_text}\n\n\
         Attachment summaries:\n{}\n\n\
         Respond with JSON containing keys to, subject, body_text.",
        attachment_block(attachments)
    )
}

fn attachment_block(attachments: &[AttachmentRecord]) -> String {
    if attachments.is_empty() {
        return NO_ATTACHMENTS.to_string();
    }
    attachments
        .iter()
        .map(|a| {
            let mut section = format!(
                "Filename: {}\nContent-Type: {}\nSize: {} bytes\nSkipped: {}",
                a.filename,
                a.content_type,
                a.size,
                if a.skipped { "yes" } else { "no" }
            );
            if let Some(reason) = &a.reason {
                section.push_str(&format!("\nReason: {reason}"));
            }
            if let Some(text) = &a.text {
                section.push_str(&format!("\nContent:\n{text}"));
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawReply {
    to: Option<String>,
    subject: Option<String>,
    body_text: Option<String>,
}

/// Parse and validate the model's response.
pub fn parse_reply(provider: &str, response: &str) -> Result<ReplyResult, LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    };

    let json_str = extract_json_object(response);
    let raw: RawReply =
        serde_json::from_str(&json_str).map_err(|e| invalid(format!("not a JSON object: {e}")))?;

    let field = |value: Option<String>, key: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("missing or empty field '{key}'")))
    };

    Ok(ReplyResult {
        recipient: field(raw.to, "to")?,
        subject: field(raw.subject, "subject")?,
        body: field(raw.body_text, "body_text")?,
    })
}

/// Extract a JSON object from LLM output that may be wrapped in markdown.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
