// src/signal.rs

//! Provides signal handling for graceful shutdown.

use crate::cancellation::CancellationToken;
use anyhow::{Context, Result};

/// Sets up a handler for Ctrl+C (SIGINT/SIGTERM).
///
/// The returned token is cancelled when the signal is caught. Passing it to
/// `cache_key`/`snapshot` makes any running git subprocess receive SIGTERM on
/// its process group, followed by SIGKILL after the configured grace period.
///
/// # Errors
/// Returns an error if the signal handler cannot be set.
pub fn setup_signal_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    ctrlc::set_handler(move || {
        log::info!("Ctrl+C signal received, cancelling git operations.");
        handler_token.cancel();
    })
    .context("Failed to set Ctrl+C signal handler")?;

    Ok(token)
}

// Signal delivery itself is exercised by the CLI integration tests.
