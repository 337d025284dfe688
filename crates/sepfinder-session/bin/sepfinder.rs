//! Console front end for sepfinder.
//!
//! Reads one input per line from standard input, prints the replies, and
//! on `/download` writes the bundle for the resolved build into the output
//! directory.

use anyhow::{Context, Result};
use clap::Parser;
use sepfinder_protocol::{ClientConfig, HttpRangeFetcher, IpswCatalog, ManifestSource};
use sepfinder_session::{
    ConsoleArgs, Dispatcher, Keyboard, Reply, SelectionSession, SessionConfig, SessionId,
    SessionStore,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const DOWNLOAD_COMMAND: &str = "/download";

#[tokio::main]
async fn main() -> Result<()> {
    let args = ConsoleArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let client_config = ClientConfig::from_env();
    let session_config = SessionConfig::from_env();
    tracing::info!(
        "Catalog {}, betas {}, session TTL {:?}",
        client_config.catalog_url,
        client_config.beta_catalog_url,
        session_config.session_ttl
    );

    let fetcher = Arc::new(HttpRangeFetcher::new(&client_config)?);
    let catalog = IpswCatalog::with_client(fetcher.client().clone(), &client_config)?;
    let session = SelectionSession::new(
        Arc::new(catalog),
        ManifestSource::new(fetcher, &client_config),
    );
    let store = Arc::new(SessionStore::new(session_config.session_ttl));
    let dispatcher = Dispatcher::new(Arc::clone(&store), session);

    let eviction = tokio::spawn({
        let store = Arc::clone(&store);
        let period = session_config.eviction_interval;
        async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                store.evict_idle();
            }
        }
    });

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let id = SessionId::new(args.session.clone());
    print_replies(&dispatcher.handle_text(&id, "/start").await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input == DOWNLOAD_COMMAND {
            match dispatcher.handle_download(&id).await {
                Ok(outcome) => {
                    print_replies(&outcome.replies);
                    let path = outcome
                        .bundle
                        .write_to(&args.output_dir)
                        .await
                        .with_context(|| format!("writing {}", outcome.bundle.file_name))?;
                    println!(
                        "Wrote {} ({} entries)",
                        path.display(),
                        outcome.bundle.entries.len()
                    );
                }
                Err(e) => {
                    tracing::warn!("Download failed: {}", e);
                    println!("{}", e.user_message());
                }
            }
            continue;
        }

        print_replies(&dispatcher.handle_text(&id, input).await);
    }

    eviction.abort();
    Ok(())
}

fn print_replies(replies: &[Reply]) {
    for reply in replies {
        println!("{}", reply.text);
        match &reply.keyboard {
            Keyboard::Options(rows) => {
                for row in rows {
                    println!("  [{}]", row.join("] ["));
                }
            }
            Keyboard::Download => println!("  (type {DOWNLOAD_COMMAND} to fetch the bundle)"),
            Keyboard::Keep | Keyboard::Remove => {}
        }
    }
}
