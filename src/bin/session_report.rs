//! Export stored calls as `conversations.csv` and `messages.csv`.
//!
//! Usage: `session_report [OUTPUT_DIR]` (defaults to the current directory).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use frontdesk::config::AppConfig;
use frontdesk::db;
use frontdesk::services::report;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let conn = db::init_db(&config.database_url)?;
    let sessions =
        report::load_all_sessions(Arc::new(Mutex::new(conn)), Duration::from_secs(60)).await?;

    let conversations_path = out_dir.join("conversations.csv");
    let messages_path = out_dir.join("messages.csv");
    let mut conversations = BufWriter::new(
        File::create(&conversations_path)
            .with_context(|| format!("failed to create {}", conversations_path.display()))?,
    );
    let mut messages = BufWriter::new(
        File::create(&messages_path)
            .with_context(|| format!("failed to create {}", messages_path.display()))?,
    );

    report::write_report(&sessions, &mut conversations, &mut messages)
        .context("failed to write report")?;
    conversations.flush()?;
    messages.flush()?;

    tracing::info!(
        sessions = sessions.len(),
        out_dir = %out_dir.display(),
        "session report written"
    );
    Ok(())
}
