//! Archive example
//!
//! Downloads every post and comment of one community into two newline-delimited JSON
//! files, printing progress until both streams are done. Ctrl+C cancels the archive and
//! keeps everything fetched so far.
//!
//! ```text
//! cargo run --example archive -- <subreddit> [start] [output dir]
//! ```
//!
//! `start` is a date (`2021-06-01`), an RFC 3339 timestamp or epoch seconds. The API
//! base URL is read from `SHIFT_API_URL`; log verbosity from `RUST_LOG`.

use shift_archiver::record::{Comment, Post};
use shift_archiver::utils::{format_duration, parse_start_cursor};
use shift_archiver::{ArchiveConfig, ArchiveStream, CombinedArchiveStream, FileSink};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

fn search_url(base: &str, kind: &str, subreddit: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?.join(&format!("reddit/{kind}/search"))?;
    url.query_pairs_mut().append_pair("subreddit", subreddit);
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(subreddit) = args.next() else {
        eprintln!("usage: archive <subreddit> [start] [output dir]");
        std::process::exit(2);
    };
    let start = match args.next() {
        Some(input) => parse_start_cursor(&input)?,
        None => 0,
    };
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    let mut base =
        std::env::var("SHIFT_API_URL").unwrap_or_else(|_| "https://api.pushshift.io".to_string());
    if !base.ends_with('/') {
        base.push('/');
    }

    let config = ArchiveConfig::default();
    let posts = ArchiveStream::<Post>::from_endpoint(
        "posts",
        search_url(&base, "submission", &subreddit)?.as_str(),
        start,
        FileSink::new(out_dir.join(format!("{subreddit}_posts.ndjson"))),
        config.clone(),
    )?;
    let comments = ArchiveStream::<Comment>::from_endpoint(
        "comments",
        search_url(&base, "comment", &subreddit)?.as_str(),
        start,
        FileSink::new(out_dir.join(format!("{subreddit}_comments.ndjson"))),
        config,
    )?;

    let archive = CombinedArchiveStream::new(Some(posts), Some(comments));
    archive.on_done_change().add_listener(|done| {
        if *done {
            println!("✓ Archive complete");
        }
    });

    // Progress report every few seconds
    let reporter = archive.clone();
    let progress = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            for status in reporter.status() {
                println!(
                    "{:>8} {:>9} {:>8} records  cursor {}  running {}",
                    status.name,
                    status.phase.to_string(),
                    status.records_written,
                    status.cursor,
                    format_duration(Duration::from_millis(status.run_time_ms), false),
                );
            }
        }
    });

    archive.start().await?;
    shift_archiver::run_until_done_or_signal(&archive).await?;
    progress.abort();

    for status in archive.status() {
        println!(
            "{}: {} records in {}",
            status.name,
            status.records_written,
            format_duration(Duration::from_millis(status.run_time_ms), true)
        );
    }
    Ok(())
}
