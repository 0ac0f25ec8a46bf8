//! RGBDS language server binary.
//!
//! Speaks LSP over stdin/stdout. Stdout belongs to the protocol, so logs go
//! to a file (or stderr when no log file can be opened).

mod config;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join("rgbds-lsp").join("logs").join("server.log"));
    }
    candidates.push(PathBuf::from(".rgbds-lsp").join("logs").join("server.log"));

    candidates
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting rgbds-language-server");

    let settings = config::load_settings();
    match rgbds_lsp::serve(tokio::io::stdin(), tokio::io::stdout(), settings).await {
        Ok(outcome) if outcome.shutdown_requested => ExitCode::SUCCESS,
        Ok(_) => {
            tracing::warn!("Session ended without a shutdown request");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Session failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
