//! Mail processing pipeline.
//!
//! Every trusted message flows through:
//! 1. `Mailbox::fetch_messages()`: trusted-sender filtered fetch
//! 2. Body + attachment extraction
//! 3. `ReplyGenerator::generate_reply()`: structured LLM reply
//! 4. `MailSender::send_mail()` then delete-and-record, or retain
//!
//! Each message ends in exactly one of deleted, retained or failed.

pub mod message;
pub mod processor;
pub mod types;

pub use message::is_sender_trusted;
pub use processor::{MailProcessor, ProcessorOptions};
pub use types::{
    EnvelopeOutcome, MailSender, Mailbox, MessageEnvelope, ReplyGenerator, ReplyResult, RunSummary,
};
