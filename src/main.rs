//! cse-hook CLI - query a Custom Search Engine through rotating proxies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cse_hook::{
    ChromeSession, ChromeSessionConfig, CseConfig, CseError, CseHook, CseResult, Pages, SearchOutcome,
};

/// cse-hook - paginated Custom Search Engine client
#[derive(Parser)]
#[command(name = "cse-hook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    shared: SharedArgs,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct SharedArgs {
    /// Public CSE widget URI (https://cse.google.com/cse?cx=...)
    #[arg(long, global = true)]
    cse_uri: Option<String>,

    /// Path to the Chrome/Chromium executable
    #[arg(long, global = true)]
    chrome: Option<PathBuf>,

    /// Proxy for the discovery browser (host:port)
    #[arg(long, global = true)]
    browser_proxy: Option<String>,

    /// Show the discovery browser window
    #[arg(long, global = true)]
    headful: bool,

    /// Give up after this many stale-endpoint rediscoveries (default: never)
    #[arg(long, global = true)]
    max_stale_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search one or more queries and print every page
    Search {
        /// Queries to search
        #[arg(required = true)]
        queries: Vec<String>,
    },

    /// Search every word of a word list until temporarily banned
    Crawl {
        /// File with one word per line
        #[arg(short, long)]
        words: PathBuf,

        /// Rediscover endpoints after this many consumed pages
        #[arg(short, long, default_value = "100")]
        renew_every: usize,
    },
}

#[derive(Serialize)]
struct PageLine<'a> {
    query: &'a str,
    page: usize,
    results: &'a [CseResult],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let cse_uri = cli
        .shared
        .cse_uri
        .clone()
        .context("--cse-uri is required")?;
    let mut config = CseConfig::new(cse_uri);
    config.max_stale_retries = cli.shared.max_stale_retries;

    let browser = Arc::new(
        ChromeSession::launch(ChromeSessionConfig {
            headless: !cli.shared.headful,
            chrome_path: cli.shared.chrome.clone(),
            proxy: cli.shared.browser_proxy.clone(),
            ..Default::default()
        })
        .await?,
    );

    let hook = CseHook::builder(config)
        .with_browser(Arc::clone(&browser) as Arc<dyn cse_hook::BrowserSession>)
        .build()
        .await?;

    let outcome = match cli.command {
        Commands::Search { queries } => run_search(&hook, &queries).await,
        Commands::Crawl { words, renew_every } => run_crawl(&hook, &words, renew_every).await,
    };

    drop(hook);
    if let Err(e) = browser.close().await {
        eprintln!("Warning: {}", e);
    }
    outcome
}

/// Pages printed for one query, and whether a ban cut them short.
struct Printed {
    pages: usize,
    banned: bool,
}

/// Prints every page of `pages` as a JSON line.
async fn print_pages(query: &str, mut pages: Pages<'_>) -> Result<Printed> {
    let mut count = 0;
    loop {
        let results = match pages.next_page().await {
            Ok(Some(results)) => results,
            Ok(None) => break,
            Err(CseError::TemporarilyBanned { .. }) => {
                return Ok(Printed {
                    pages: count,
                    banned: true,
                });
            }
            Err(e) => return Err(e.into()),
        };
        count += 1;
        let line = PageLine {
            query,
            page: count,
            results: &results,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(Printed {
        pages: count,
        banned: false,
    })
}

async fn run_search(hook: &CseHook, queries: &[String]) -> Result<()> {
    for query in queries {
        match hook.search(query, false).await? {
            SearchOutcome::Banned => anyhow::bail!("Temporarily banned, try again later"),
            SearchOutcome::Pages(pages) => {
                if print_pages(query, pages).await?.banned {
                    anyhow::bail!("Temporarily banned, try again later");
                }
            }
        }
    }
    Ok(())
}

async fn run_crawl(hook: &CseHook, words: &Path, renew_every: usize) -> Result<()> {
    let text = tokio::fs::read_to_string(words)
        .await
        .with_context(|| format!("reading {}", words.display()))?;
    let mut words: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .collect();
    words.shuffle(&mut rand::thread_rng());

    let mut consumed = 0;
    let mut until_renewal = renew_every;

    for word in words {
        let renew = until_renewal == 0;
        if renew {
            until_renewal = renew_every;
        }

        match hook.search(word, renew).await? {
            SearchOutcome::Banned => {
                eprintln!("Temporarily banned, stopping");
                break;
            }
            SearchOutcome::Pages(pages) => {
                let printed = print_pages(word, pages).await?;
                consumed += printed.pages;
                until_renewal = until_renewal.saturating_sub(printed.pages);
                if printed.banned {
                    eprintln!("Temporarily banned, stopping");
                    break;
                }
            }
        }
    }

    eprintln!("Number of pages: {}", consumed);
    Ok(())
}
