//! Append-only run log
//!
//! The supervisor writes a header before each attempt and a footer after it.
//! Everything in between is the trainer's combined stdout/stderr. Existing
//! bytes are never rewritten.

use crate::constants::MAX_TAIL_LINES;
use crate::models::LaunchMode;
use crate::state_machine::RunState;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const HEADER_RULE: &str = "=== Training Run ===";

/// Append the attempt header; returns the log size once it is written
pub async fn append_header(
    log_path: &Path,
    run_id: Uuid,
    attempt: u32,
    mode: LaunchMode,
    command: &str,
    started_at: DateTime<Utc>,
) -> std::io::Result<u64> {
    let header = format!(
        "\n{HEADER_RULE}\nRun ID: {run_id}\nAttempt: {attempt}\nMode: {}\nCommand: {command}\nStarted: {}\n{}\n\n",
        launch_mode_label(mode),
        started_at.to_rfc3339(),
        "=".repeat(HEADER_RULE.len()),
    );
    append(log_path, header.as_bytes()).await?;
    Ok(tokio::fs::metadata(log_path).await?.len())
}

/// Append the attempt footer
pub async fn append_footer(
    log_path: &Path,
    attempt: u32,
    status: RunState,
    reason: Option<&str>,
    finished_at: DateTime<Utc>,
) -> std::io::Result<()> {
    let mut footer = format!(
        "\n=== Attempt {attempt} finished: {status} at {} ===\n",
        finished_at.to_rfc3339()
    );
    if let Some(reason) = reason {
        footer.push_str(&format!("Reason: {reason}\n"));
    }
    append(log_path, footer.as_bytes()).await
}

async fn append(log_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

fn launch_mode_label(mode: LaunchMode) -> &'static str {
    match mode {
        LaunchMode::Fresh => "fresh",
        LaunchMode::Resume => "resume",
        LaunchMode::Force => "force",
    }
}

/// Size and modification time of the log, if it exists
pub async fn stat(log_path: &Path) -> std::io::Result<Option<(u64, SystemTime)>> {
    match tokio::fs::metadata(log_path).await {
        Ok(meta) => Ok(Some((meta.len(), meta.modified()?))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Full log text; an absent log reads as empty
pub async fn read_all(log_path: &Path) -> std::io::Result<String> {
    match tokio::fs::read(log_path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Last `max_lines` lines of the log
pub async fn tail(log_path: &Path, max_lines: usize) -> std::io::Result<String> {
    let text = read_all(log_path).await?;
    Ok(tail_lines(&text, max_lines.min(MAX_TAIL_LINES)))
}

fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
