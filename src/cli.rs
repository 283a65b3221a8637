//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MailAssist -- answers trusted senders' mail with LLM-drafted replies.
#[derive(Parser)]
#[command(
    name = "mailassist",
    version,
    about = "Process a mailbox of trusted-sender requests into LLM-drafted replies"
)]
pub struct Cli {
    /// Path to the configuration file (.toml or .json).
    #[arg(long, global = true, env = "MAILASSIST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence when set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process every trusted message in the mailbox once.
    Run {
        /// Send each reply back to the original sender instead of the
        /// generated recipient.
        #[arg(long)]
        safe_mode: bool,
    },

    /// Forward the first trusted message back to its sender to check the setup.
    Test,
}
