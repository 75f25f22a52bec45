//! range-dl - A parallel HTTP downloader built on byte-range requests.
//!
//! A resource is probed for its size and range support, split into
//! contiguous chunks, fetched concurrently with per-chunk retry and
//! in-process resume, and merged back into a single file whose MD5 is
//! checked against the server's `Content-Md5` when one is announced.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use range_dl::{DownloadConfig, DownloadJob, DownloadProgress, JobRequest, NoProgress};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> range_dl::Result<()> {
//! let request = JobRequest::new("https://example.com/big.iso")
//!     .with_output_dir("downloads")
//!     .with_config(DownloadConfig::new().with_threads(8));
//!
//! let mut job = DownloadJob::new(request)?;
//! let progress: Arc<dyn DownloadProgress> = Arc::new(NoProgress);
//! let report = job.run(&progress, &CancellationToken::new()).await?;
//! println!("Wrote {} bytes to {}", report.size, report.path.display());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod barrier;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod format;
pub mod fs;
pub mod http;
pub mod merge;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod state;
pub mod stats;
pub mod url;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use barrier::{BarrierGuard, CompletionBarrier};
pub use checksum::{ChecksumStatus, ExpectedMd5};
pub use config::DownloadConfig;
pub use download::{DownloadJob, DownloadReport, JobRequest, download};
pub use error::{Error, Result};
pub use fetch::{ChunkFetcher, FetchOptions};
pub use format::{format_bytes, format_duration, format_rate};
pub use fs::{FileSystem, TokioFileSystem};
pub use http::{HttpClient, RangeSource, Redirect};
pub use plan::{ChunkRange, DownloadPlan};
pub use probe::{ProbeReport, RangeSupport};
pub use progress::{DownloadProgress, NoProgress, ProgressAggregator, ProgressFrame};
pub use state::{ChunkSnapshot, ChunkState, ChunkStates, ConnectionState, ProgressSource};
pub use stats::TransferStats;
