//! Download command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::debug;

use rangeload::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT};
use rangeload::{
    DownloadSession, DownloadTarget, EngineConfig, HistoryLedger, HttpChunkFetcher, MetadataCache,
};

use super::common::{format_size, open_store};
use crate::error::CliError;

/// Arguments for the `get` command.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// URL of the artifact to download
    pub url: String,

    /// Output path (defaults to the URL's file name)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Total size in bytes, for servers that do not answer HEAD requests
    #[arg(long)]
    pub size: Option<u64>,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Maximum concurrent chunk fetches (1 = sequential)
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT)]
    pub concurrency: usize,
}

/// Run a chunked download to completion, rendering live progress.
pub async fn run(args: GetArgs) -> Result<(), CliError> {
    let config = EngineConfig::default()
        .with_chunk_size(args.chunk_size)
        .with_max_concurrent(args.concurrency);
    let fetcher = HttpChunkFetcher::from_config(&config);

    let store = open_store()?;
    let ledger = HistoryLedger::new(Arc::clone(&store));
    let metadata = MetadataCache::new(Arc::clone(&store));

    let total_size = match args.size {
        Some(size) => size,
        None => resolve_size(&fetcher, &metadata, &args.url).await?,
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_filename(&args.url));
    let display_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact.bin".to_string());

    println!(
        "Downloading {} ({})",
        style(&display_name).bold(),
        format_size(total_size)
    );

    let target = DownloadTarget::new(&args.url, display_name, total_size);
    let bar = progress_bar(total_size);

    let session = DownloadSession::new(target, config)
        .with_fetcher(Arc::new(fetcher))
        .with_history(ledger)
        .on_progress({
            let bar = bar.clone();
            move |sample| {
                bar.set_position(sample.downloaded_bytes);
                match sample.eta_seconds {
                    Some(eta) => bar.set_message(format!("eta {eta}s")),
                    None => bar.set_message("eta --"),
                }
            }
        });

    let controls = session.controls();
    if let Err(err) = ctrlc::set_handler(move || controls.cancel()) {
        debug!(error = %err, "could not install Ctrl-C handler");
    }

    let artifact = match session.run().await {
        Ok(artifact) => artifact,
        Err(err) if err.is_cancelled() => {
            bar.finish_and_clear();
            println!("{}", style("Download cancelled").yellow());
            return Ok(());
        }
        Err(err) => {
            bar.finish_and_clear();
            return Err(err.into());
        }
    };
    bar.finish_and_clear();

    std::fs::write(&output_path, &artifact).map_err(|source| CliError::Write {
        path: output_path.clone(),
        source,
    })?;

    println!(
        "{} {} ({})",
        style("Saved").green().bold(),
        output_path.display(),
        format_size(artifact.len() as u64)
    );
    Ok(())
}

/// Determine the artifact size, reusing recently probed metadata when the
/// cache still holds an entry for this URL.
async fn resolve_size(
    fetcher: &HttpChunkFetcher,
    metadata: &MetadataCache,
    url: &str,
) -> Result<u64, CliError> {
    if let Some(meta) = metadata.get().await {
        if meta.get("url").and_then(|v| v.as_str()) == Some(url) {
            if let Some(size) = meta.get("size").and_then(|v| v.as_u64()) {
                debug!(size, "using cached artifact metadata");
                return Ok(size);
            }
        }
    }

    let info = fetcher.probe(url).await?;
    if !info.accepts_ranges {
        debug!("server does not advertise range support");
    }
    let size = info
        .content_length
        .ok_or_else(|| CliError::UnknownSize(url.to_string()))?;
    metadata.set(json!({ "url": url, "size": size })).await;
    Ok(size)
}

fn default_filename(url: &str) -> PathBuf {
    url.split('?')
        .next()
        .and_then(|base| base.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact.bin")
        .into()
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {msg})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filename_from_url() {
        assert_eq!(
            default_filename("https://example.com/releases/installer-1.4.0.pkg"),
            PathBuf::from("installer-1.4.0.pkg")
        );
    }

    #[test]
    fn test_default_filename_strips_query() {
        assert_eq!(
            default_filename("https://example.com/a.bin?token=abc"),
            PathBuf::from("a.bin")
        );
    }

    #[test]
    fn test_default_filename_fallback() {
        assert_eq!(
            default_filename("https://example.com/"),
            PathBuf::from("artifact.bin")
        );
    }
}
