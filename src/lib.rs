//! MailAssist: trusted-sender mail queue processor.

pub mod attachments;
pub mod channels;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod pipeline;
