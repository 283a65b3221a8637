use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use mailassist::attachments::AttachmentProcessor;
use mailassist::channels::{ImapMailbox, SmtpSender};
use mailassist::config::load_app_config;
use mailassist::ledger::StateLedger;
use mailassist::llm::create_reply_generator;
use mailassist::pipeline::{MailProcessor, ProcessorOptions};

mod cli;

use cli::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let mut config =
        load_app_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Commands::Run { safe_mode: true } = cli.command {
        config.safe_mode = true;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        imap = %config.imap.host,
        folder = %config.imap.folder,
        trusted = config.trusted_senders.len(),
        safe_mode = config.safe_mode,
        "MailAssist starting"
    );

    // ── Collaborators ────────────────────────────────────────────────
    let mailbox = Arc::new(ImapMailbox::new(
        config.imap.clone(),
        config.queue_policy.archive_before_delete.clone(),
    ));
    let sender = Arc::new(SmtpSender::new(config.smtp.clone()));
    let generator = create_reply_generator(&config.llm)?;
    let ledger = StateLedger::open(
        &config.state.deleted_record_path,
        &config.state.failed_record_path,
    )
    .await?;
    let attachments = AttachmentProcessor::new(config.attachment_policy.clone());

    let processor = MailProcessor::new(
        mailbox.clone(),
        sender,
        generator,
        attachments,
        ledger,
        ProcessorOptions::from_config(&config),
    );

    // ── Dispatch ─────────────────────────────────────────────────────
    let result = match cli.command {
        Commands::Run { .. } => processor.run().await.map(|summary| {
            eprintln!(
                "Processed {} message(s): {} deleted, {} retained, {} failed",
                summary.fetched, summary.deleted, summary.retained, summary.failed
            );
        }),
        Commands::Test => processor.run_test_mode().await.map(|forwarded| {
            if forwarded {
                eprintln!("Test message forwarded.");
            } else {
                eprintln!("No trusted messages found.");
            }
        }),
    };

    mailbox.close().await;
    result?;
    Ok(())
}
