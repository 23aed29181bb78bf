//! Condense every `.txt` file in a directory
//!
//! This demo wires the library together end to end with a local stand-in for
//! the remote service that keeps the first sentence of every paragraph.
//!
//! ```bash
//! cargo run --example condense_dir -- path/to/novel [start-end]
//! ```
//!
//! Credentials are read from `api_keys.json` when one is found; otherwise a
//! single local key is used. Press Ctrl+C to stop after the items in flight.

use condense_dispatch::store::{ChapterRange, DiscoveryOptions, default_output_dir, discover_documents};
use condense_dispatch::{
    CondenseError, Config, CredentialLease, CredentialPool, Dispatcher, Event, FsDocumentStore,
    RemoteCondenser, RunOptions, interrupt_on_signal,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Keeps the first sentence of each paragraph
struct FirstSentenceCondenser;

#[async_trait::async_trait]
impl RemoteCondenser for FirstSentenceCondenser {
    async fn condense(&self, content: &str, _lease: &CredentialLease) -> Result<String, CondenseError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let condensed: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.find(['。', '.', '!', '！', '?', '？']) {
                Some(end) => {
                    let stop = line[end..].chars().next().map_or(0, char::len_utf8);
                    line[..end + stop].to_string()
                }
                None => line.to_string(),
            })
            .collect();
        Ok(condensed.join("\n"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().ok_or("usage: condense_dir <input> [start-end]")?);
    let range = args.next().map(|r| r.parse::<ChapterRange>()).transpose()?;

    let config = match Config::discover(None) {
        Ok((config, path)) => {
            println!("Using credentials from {}", path.display());
            config
        }
        Err(e) => {
            println!("{e}; using a local demo key");
            Config::default().with_single_key("local-demo-key")
        }
    };

    let output = config
        .store
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&input));
    let docs = discover_documents(
        &input,
        &DiscoveryOptions {
            range,
            exclude: Some(output.clone()),
            limit: None,
        },
    )?;

    let pool = Arc::new(CredentialPool::new(&config)?);
    let store = Arc::new(FsDocumentStore::from_config(&config.store, &output));
    let dispatcher = Dispatcher::new(
        pool,
        store,
        Arc::new(FirstSentenceCondenser),
        config.dispatch.clone(),
    )
    .with_progress(|completed: usize, total: usize, message: &str| {
        println!("[{completed}/{total}] {message}");
    });

    let mut events = dispatcher.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::CredentialSkipped { credential, errors } => {
                    println!("Credential {credential} skipped after {errors} errors");
                }
                Event::EarlyStop { reason } => println!("Stopping early: {reason}"),
                _ => {}
            }
        }
    });

    let _signals = interrupt_on_signal(dispatcher.halt_signal());
    let report = dispatcher.run(docs, RunOptions::default()).await;

    println!("\n{}", report.summary);
    println!("Output written to {}", output.display());
    Ok(())
}
