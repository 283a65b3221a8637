//! Attachment text extraction.
//!
//! Every attachment on a message yields exactly one [`ProcessedAttachment`].
//! Attachments that cannot be forwarded are not dropped: they are kept as
//! skipped records carrying a [`SkipReason`], so the model is told what was
//! left out and why.
//!
//! Decision order per attachment (first match wins):
//! 1. forwarding disabled by policy
//! 2. extension not PDF/DOCX
//! 3. decoded size above the limit (the limit itself is allowed)
//! 4. format-specific extraction; any error becomes a skip
//! 5. extraction produced only whitespace

pub mod docx;
pub mod pdf;

use std::fmt;
use std::sync::Arc;

use mail_parser::{MessagePart, MimeHeaders};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AttachmentPolicy;
use crate::error::ExtractionError;

pub use pdf::PdfTextExtractor;

/// Filename used when an attachment part carries none.
pub const UNNAMED_ATTACHMENT: &str = "unnamed";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Attachment formats whose text can be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Pdf,
    Docx,
}

impl SupportedFormat {
    /// Infer the format from the filename suffix (case-insensitive).
    ///
    /// A bare `.pdf` counts too, which `Path::extension` would treat as a
    /// dotfile with no extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".docx") {
            Some(Self::Docx)
        } else {
            None
        }
    }
}

/// Why an attachment was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ForwardingDisabled,
    UnsupportedType,
    SizeExceeded,
    ExtractionFailed(String),
    NoText,
}

impl SkipReason {
    /// Skips caused by configuration or file type, as opposed to content problems.
    fn is_policy(&self) -> bool {
        matches!(self, Self::ForwardingDisabled | Self::UnsupportedType)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForwardingDisabled => f.write_str("forwarding disabled by configuration"),
            Self::UnsupportedType => f.write_str("unsupported file type"),
            Self::SizeExceeded => f.write_str("size exceeds limit"),
            Self::ExtractionFailed(cause) => write!(f, "extraction failed: {cause}"),
            Self::NoText => f.write_str("no textual content extracted"),
        }
    }
}

/// Outcome of extracting one attachment: either text or a reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    Text(String),
    Skipped(SkipReason),
}

/// One attachment found on a message, after policy and extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedAttachment {
    pub filename: String,
    pub content_type: String,
    /// Decoded payload size in bytes.
    pub size: u64,
    pub content: AttachmentContent,
}

impl ProcessedAttachment {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            AttachmentContent::Text(text) => Some(text),
            AttachmentContent::Skipped(_) => None,
        }
    }

    pub fn skipped(&self) -> bool {
        matches!(self.content, AttachmentContent::Skipped(_))
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.content {
            AttachmentContent::Skipped(reason) => Some(reason),
            AttachmentContent::Text(_) => None,
        }
    }

    /// Flatten into the plain record handed to reply generation.
    pub fn to_record(&self) -> AttachmentRecord {
        AttachmentRecord {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            size: self.size,
            skipped: self.skipped(),
            reason: self.skip_reason().map(ToString::to_string),
            text: self.text().map(str::to_string),
        }
    }
}

/// Plain key-value view of a [`ProcessedAttachment`] for prompt building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRecord {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub skipped: bool,
    pub reason: Option<String>,
    pub text: Option<String>,
}

/// Order-preserving conversion, one record per attachment including skipped ones.
pub fn to_records(attachments: &[ProcessedAttachment]) -> Vec<AttachmentRecord> {
    attachments.iter().map(ProcessedAttachment::to_record).collect()
}

/// Applies the attachment policy and extracts text from supported formats.
#[derive(Clone)]
pub struct AttachmentProcessor {
    policy: AttachmentPolicy,
    pdf: Option<Arc<dyn PdfTextExtractor>>,
}

impl AttachmentProcessor {
    /// Create a processor using the built-in PDF extractor when compiled in.
    pub fn new(policy: AttachmentPolicy) -> Self {
        Self {
            policy,
            pdf: pdf::default_extractor(),
        }
    }

    /// Replace the PDF text extraction backend.
    pub fn with_pdf_extractor(mut self, extractor: Arc<dyn PdfTextExtractor>) -> Self {
        self.pdf = Some(extractor);
        self
    }

    /// Run without any PDF backend; PDF attachments then fail extraction.
    pub fn without_pdf_extractor(mut self) -> Self {
        self.pdf = None;
        self
    }

    pub fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Process every attachment on `message`, in the order they appear.
    pub fn process(&self, message: &mail_parser::Message<'_>) -> Vec<ProcessedAttachment> {
        message
            .attachments()
            .map(|part| self.process_message_part(part))
            .collect()
    }

    fn process_message_part(&self, part: &MessagePart<'_>) -> ProcessedAttachment {
        let filename = part.attachment_name().unwrap_or(UNNAMED_ATTACHMENT);
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            })
            .map(|ct| ct.to_ascii_lowercase())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        self.process_payload(filename, &content_type, part.contents())
    }

    /// Apply the decision sequence to a single decoded payload.
    pub fn process_payload(
        &self,
        filename: &str,
        content_type: &str,
        payload: &[u8],
    ) -> ProcessedAttachment {
        let size = payload.len() as u64;
        let content = match self.decide(filename, payload) {
            Ok(text) => {
                debug!(filename, size, "Extracted attachment text");
                AttachmentContent::Text(text)
            }
            Err(reason) => {
                if reason.is_policy() {
                    info!(filename, %reason, "Skipping attachment");
                } else {
                    warn!(filename, size, limit = self.policy.max_attachment_size_bytes(), %reason, "Skipping attachment");
                }
                AttachmentContent::Skipped(reason)
            }
        };
        ProcessedAttachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size,
            content,
        }
    }

    fn decide(&self, filename: &str, payload: &[u8]) -> Result<String, SkipReason> {
        if !self.policy.forwarding_enabled {
            return Err(SkipReason::ForwardingDisabled);
        }
        let format = SupportedFormat::from_filename(filename).ok_or(SkipReason::UnsupportedType)?;
        if payload.len() as u64 > self.policy.max_attachment_size_bytes() {
            return Err(SkipReason::SizeExceeded);
        }
        let text = self
            .extract_text(format, payload)
            .map_err(|e| SkipReason::ExtractionFailed(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(SkipReason::NoText);
        }
        Ok(text)
    }

    fn extract_text(
        &self,
        format: SupportedFormat,
        payload: &[u8],
    ) -> Result<String, ExtractionError> {
        match format {
            SupportedFormat::Docx => docx::extract_text(payload),
            SupportedFormat::Pdf => {
                let extractor = self.pdf.as_ref().ok_or(ExtractionError::PdfUnavailable)?;
                Ok(pdf::join_pages(extractor.extract_pages(payload)?))
            }
        }
    }
}

impl fmt::Debug for AttachmentProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentProcessor")
            .field("policy", &self.policy)
            .field("pdf", &self.pdf.is_some())
            .finish()
    }
}
