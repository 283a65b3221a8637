//! Error types for MailAssist.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that end a whole run rather than a single message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("Login failed for {username} on {host}")]
    AuthFailed { host: String, username: String },

    #[error("IMAP command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("IMAP connection closed by server")]
    Disconnected,

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound delivery (SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid {role} address {address}: {reason}")]
    InvalidAddress {
        role: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP relay error: {0}")]
    Relay(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Attachment text-extraction errors.
///
/// These never leave the attachment processor: each one is folded into a
/// skipped attachment record.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("missing archive entry {0}")]
    MissingEntry(String),

    #[error("malformed document XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("PDF decode failed: {0}")]
    Pdf(String),

    #[error("PDF text extraction is not available in this build")]
    PdfUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to prepare ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to append to ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline errors.
///
/// The display string of each variant is what lands in the failed ledger,
/// so wrapped errors are rendered transparently.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mailbox fetch failed: {0}")]
    Fetch(#[source] MailboxError),

    #[error("Message could not be parsed as RFC 5322")]
    Unparseable,

    #[error(transparent)]
    Generate(#[from] LlmError),

    #[error(transparent)]
    Send(#[from] DeliveryError),

    #[error(transparent)]
    Delete(MailboxError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("No recipient available: {0}")]
    NoRecipient(String),
}
