//! gallerycache worker - offline-first asset cache for a museum audio guide.
//!
//! Reads newline-delimited JSON client messages on stdin and writes JSON
//! responses (and streamed caching progress events) on stdout. `--status`
//! and `--purge` run a single operation and exit.

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gallerycache::config::Config;
use gallerycache::worker::{ClientMessage, Worker, WorkerResponse};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Set up logging with environment-based filter
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn emit(response: &WorkerResponse) {
    match serde_json::to_string(response) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    info!("gallerycache worker starting");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let (worker, mut events) = Worker::new(config)?;

    // One-shot CLI commands
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--status" {
        let status = worker.status();
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    if args.len() > 1 && args[1] == "--purge" {
        let response = worker.handle_message(ClientMessage::PurgeCache).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    // Message loop. Each message is handled in its own task so a long
    // caching run cannot stall later messages or the progress stream.
    let worker = Arc::new(worker);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                if let Some(event) = event {
                    emit(&event);
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let worker = worker.clone();
                        tokio::spawn(async move {
                            let response = worker.handle_raw(&line).await;
                            emit(&response);
                        });
                    }
                    None => break,
                }
            }
        }
    }

    info!("gallerycache worker shutting down");
    Ok(())
}
