//! Mail transport adapters: IMAP for the inbound queue, SMTP for replies.

pub mod imap;
pub mod smtp;

pub use imap::ImapMailbox;
pub use smtp::SmtpSender;
