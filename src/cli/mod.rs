//! CLI mode for `rdl`: argument parsing, config layering and the run loop.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{DownloadConfig, DownloadProgress, JobRequest, Result, download};

pub use progress::BarProgress;
use progress::{print_checksum_warning, print_error, print_summary};

/// Command-line arguments of `rdl`.
#[derive(Debug, Parser)]
#[command(name = "rdl", version)]
#[command(about = "Download a file over HTTP with parallel byte-range requests")]
pub struct Args {
    /// URL of the resource
    pub url: String,

    /// Directory to write the file into
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Number of parallel connections
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Output filename (defaults to the name in the URL)
    #[arg(short = 'f', long)]
    pub filename: Option<String>,

    /// Proxy URL for all requests
    #[arg(long)]
    pub proxy: Option<String>,

    /// Configuration file (defaults to the per-user config location)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Give a chunk up after this many consecutive failed attempts
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds to wait before reconnecting after a failure
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Suppress progress bars and the summary
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

impl Args {
    /// Loads the config file and layers the command-line overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named config file cannot be loaded,
    /// or the default one exists but is malformed.
    pub fn load_config(&self) -> Result<DownloadConfig> {
        let mut config = match &self.config {
            Some(path) => DownloadConfig::load(path)?,
            None => DownloadConfig::load_or_default(&DownloadConfig::default_path())?,
        };
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        if self.proxy.is_some() {
            config = config.with_proxy(self.proxy.clone());
        }
        if self.max_retries.is_some() {
            config = config.with_max_retries(self.max_retries);
        }
        if let Some(secs) = self.retry_delay {
            config = config.with_retry_delay(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Builds the job request these arguments describe.
    ///
    /// # Errors
    ///
    /// See [`Args::load_config`].
    pub fn into_request(self) -> Result<JobRequest> {
        let config = self.load_config()?;
        Ok(JobRequest::new(self.url)
            .with_output_dir(self.output_dir)
            .with_filename(self.filename)
            .with_config(config))
    }
}

/// Runs one download to completion and maps the outcome to an exit code.
///
/// Ctrl-C cancels the job. A checksum mismatch is reported but still exits
/// successfully.
pub async fn run(args: Args) -> ExitCode {
    let quiet = args.quiet;
    let request = match args.into_request() {
        Ok(request) => request,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let bars = Arc::new(BarProgress::new(quiet));
    let progress: Arc<dyn DownloadProgress> = bars.clone();
    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received SIGINT");
                cancel.cancel();
            }
        })
    };

    let result = download(request, &progress, &cancel).await;
    signal.abort();

    match result {
        Ok(report) => {
            if !quiet {
                print_summary(&report);
            }
            print_checksum_warning(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            bars.abandon();
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}
