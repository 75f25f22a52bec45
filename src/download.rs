//! The download job: probe, plan, fetch every chunk in parallel, then merge.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::barrier::CompletionBarrier;
use crate::checksum::{ChecksumStatus, ExpectedMd5};
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::fetch::{ChunkFetcher, FetchOptions};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::http::{HttpClient, Redirect};
use crate::merge::{ChunkFile, MergeOptions, merge_chunks};
use crate::plan::DownloadPlan;
use crate::probe::{ProbeReport, probe};
use crate::progress::{DownloadProgress, run_aggregator};
use crate::state::ChunkStates;
use crate::stats::{TransferStats, TransferTracker};
use crate::url::{FALLBACK_FILENAME, filename_from_url, sanitize_filename};

/// User inputs for one download.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Resource to download.
    pub url: String,
    /// Directory receiving the chunk files and the output.
    pub output_dir: PathBuf,
    /// Output filename. When unset it comes from the URL, a redirect or the server.
    pub filename: Option<String>,
    /// Engine settings.
    pub config: DownloadConfig,
}

impl JobRequest {
    /// Creates a request for `url` into the current directory with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            output_dir: PathBuf::from("."),
            filename: None,
            config: DownloadConfig::default(),
        }
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Pins the output filename. Empty names are ignored.
    #[must_use]
    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename.filter(|f| !f.is_empty());
        self
    }

    /// Replaces the engine settings.
    #[must_use]
    pub fn with_config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }
}

/// Outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Effective URL after redirects.
    pub url: String,
    /// Where the output was written.
    pub path: PathBuf,
    /// Bytes in the output.
    pub size: u64,
    /// Number of chunks the resource was split into.
    pub chunks: usize,
    /// Speed figures for the transfer.
    pub stats: TransferStats,
    /// Result of comparing against the server's Content-MD5.
    pub checksum: ChecksumStatus,
}

/// One download from probe to merged output.
///
/// The URL and filename may change while probing (redirects, server-provided
/// names); they are fixed once the plan exists.
pub struct DownloadJob<F: FileSystem = TokioFileSystem> {
    url: String,
    output_dir: PathBuf,
    filename: String,
    filename_pinned: bool,
    checksum: Option<ExpectedMd5>,
    config: DownloadConfig,
    plan: Option<DownloadPlan>,
    states: Option<ChunkStates>,
    client: HttpClient,
    barrier: CompletionBarrier,
    fs: F,
    done: bool,
}

impl DownloadJob<TokioFileSystem> {
    /// Creates a job that writes through `tokio::fs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty URL, an unusable filename
    /// or invalid settings.
    pub fn new(request: JobRequest) -> Result<Self> {
        Self::with_fs(request, TokioFileSystem::new())
    }
}

impl<F: FileSystem> DownloadJob<F> {
    /// Creates a job over a custom file system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty URL, an unusable filename
    /// or invalid settings.
    pub fn with_fs(request: JobRequest, fs: F) -> Result<Self> {
        let JobRequest {
            url,
            output_dir,
            filename,
            config,
        } = request;

        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(Error::InvalidConfig("download URL is empty".into()));
        }
        config.validate()?;

        let (filename, filename_pinned) = match filename {
            Some(name) => {
                let clean = sanitize_filename(&name)
                    .ok_or_else(|| Error::InvalidConfig(format!("unusable filename {name:?}")))?;
                (clean, true)
            }
            None => (
                filename_from_url(&url).unwrap_or_else(|| FALLBACK_FILENAME.to_string()),
                false,
            ),
        };

        let client = HttpClient::new(&config)?;
        Ok(Self {
            url,
            output_dir,
            filename,
            filename_pinned,
            checksum: None,
            config,
            plan: None,
            states: None,
            client,
            barrier: CompletionBarrier::new(),
            fs,
            done: false,
        })
    }

    /// Current effective URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current output filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Where the merged output goes.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }

    /// Expected digest learned from the probe.
    #[must_use]
    pub const fn checksum(&self) -> Option<&ExpectedMd5> {
        self.checksum.as_ref()
    }

    /// The range plan, once probing has succeeded.
    #[must_use]
    pub const fn plan(&self) -> Option<&DownloadPlan> {
        self.plan.as_ref()
    }

    /// Live chunk states, once the plan exists.
    #[must_use]
    pub const fn states(&self) -> Option<&ChunkStates> {
        self.states.as_ref()
    }

    /// Settings the job runs with.
    #[must_use]
    pub const fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// True only after the output has been merged.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Temporary file for chunk `index`: `{output_dir}/{filename}_{index}`.
    #[must_use]
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{index}", self.filename))
    }

    fn apply_redirect(&mut self, redirect: &Redirect) {
        log::info!("Redirected to {}", redirect.url);
        self.url.clone_from(&redirect.url);
        if !self.filename_pinned
            && let Some(name) = &redirect.filename
        {
            self.filename.clone_from(name);
        }
    }

    fn apply_probe(&mut self, report: &ProbeReport) {
        if let Some(redirect) = report.final_redirect() {
            self.apply_redirect(redirect);
        }
        if !self.filename_pinned
            && let Some(name) = &report.server_filename
        {
            log::info!("Server suggests filename {name}");
            self.filename.clone_from(name);
        }
        self.checksum = report.checksum;
    }

    /// Runs the job to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of whichever phase failed. Chunk files
    /// are removed on failure; a partially merged output is left in place.
    pub async fn run(
        &mut self,
        progress: &Arc<dyn DownloadProgress>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        if self.done {
            return Err(Error::InvalidConfig("job has already completed".into()));
        }

        let report = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            report = probe(&self.client, &self.url) => report?,
        };
        self.apply_probe(&report);
        progress.on_probe(&report);

        let plan = DownloadPlan::new(report.total_size, self.config.threads);
        log::info!(
            "Downloading {} ({} bytes) as {} chunk(s) into {}",
            self.url,
            plan.total_size(),
            plan.len(),
            self.output_path().display()
        );
        progress.on_plan(&plan);
        let states = ChunkStates::from_plan(&plan);
        self.plan = Some(plan.clone());
        self.states = Some(states.clone());

        let tracker = TransferTracker::new(plan.total_size());
        if let Err(e) = self.fetch_all(&plan, &states, progress, &tracker, cancel).await {
            self.remove_chunk_files(&plan).await;
            return Err(e);
        }

        let files: Vec<ChunkFile> = plan
            .chunks()
            .iter()
            .map(|range| ChunkFile {
                range: *range,
                path: self.chunk_path(range.index),
            })
            .collect();
        let options = MergeOptions {
            atomic: self.config.atomic_output,
            buffer_size: self.config.read_buffer_size,
        };
        let merged = match merge_chunks(
            &self.fs,
            &files,
            &self.output_path(),
            self.checksum.as_ref(),
            options,
            progress.as_ref(),
        )
        .await
        {
            Ok(merged) => merged,
            Err(e) => {
                self.remove_chunk_files(&plan).await;
                return Err(e);
            }
        };
        self.done = true;

        let report = DownloadReport {
            url: self.url.clone(),
            path: merged.path,
            size: merged.bytes_written,
            chunks: plan.len(),
            stats: tracker.finish(),
            checksum: merged.checksum,
        };
        log::info!(
            "Finished {} in {:?}",
            report.path.display(),
            report.stats.elapsed
        );
        progress.on_complete(&report);
        Ok(report)
    }

    async fn fetch_all(
        &self,
        plan: &DownloadPlan,
        states: &ChunkStates,
        progress: &Arc<dyn DownloadProgress>,
        tracker: &TransferTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.fs.create_dir_all(&self.output_dir).await?;
        let mut files = Vec::with_capacity(plan.len());
        for range in plan.chunks() {
            files.push(
                self.fs
                    .create_file(&self.chunk_path(range.index), range.len)
                    .await?,
            );
        }

        // A fatal chunk error stops its siblings without touching the caller's token.
        let fetch_cancel = cancel.child_token();
        let options = Arc::new(FetchOptions::from(&self.config));
        // The aggregator's slot must exist before any fetcher can finish.
        let aggregator_slot = self.barrier.register();

        let handles: Vec<_> = states
            .iter()
            .zip(files)
            .map(|(state, mut file)| {
                let guard = self.barrier.register();
                let client = self.client.clone();
                let url = self.url.clone();
                let state = Arc::clone(state);
                let options = Arc::clone(&options);
                let progress = Arc::clone(progress);
                let cancel = fetch_cancel.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    let fetcher = ChunkFetcher::new(
                        &client,
                        &url,
                        &state,
                        &options,
                        progress.as_ref(),
                        &cancel,
                    );
                    let result = fetcher.run(&mut file).await;
                    if let Err(e) = &result
                        && !matches!(e, Error::Cancelled)
                    {
                        log::error!("[Chunk {}] {e}", state.range().index);
                        cancel.cancel();
                    }
                    result
                })
            })
            .collect();

        run_aggregator(
            states,
            &self.barrier,
            aggregator_slot,
            self.config.progress_interval(),
            progress.as_ref(),
            tracker,
            &fetch_cancel,
        )
        .await;
        self.barrier.wait().await;

        let mut failure: Option<Error> = None;
        for joined in join_all(handles).await {
            let err = match joined {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::from(e),
            };
            // Sibling cancellations only echo the real failure.
            if failure
                .as_ref()
                .is_none_or(|f| matches!(f, Error::Cancelled))
            {
                failure = Some(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    async fn remove_chunk_files(&self, plan: &DownloadPlan) {
        for range in plan.chunks() {
            let path = self.chunk_path(range.index);
            if let Err(e) = self.fs.remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!("Could not remove {}: {e}", path.display());
            }
        }
    }
}

/// Convenience wrapper: builds a job from `request` and runs it.
///
/// # Errors
///
/// See [`DownloadJob::new`] and [`DownloadJob::run`].
pub async fn download(
    request: JobRequest,
    progress: &Arc<dyn DownloadProgress>,
    cancel: &CancellationToken,
) -> Result<DownloadReport> {
    DownloadJob::new(request)?.run(progress, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::RangeSupport;

    fn job(request: JobRequest) -> DownloadJob {
        DownloadJob::new(request).unwrap()
    }

    fn report() -> ProbeReport {
        ProbeReport {
            total_size: 10,
            checksum: None,
            server_filename: None,
            range_support: RangeSupport::Advertised,
            redirects: Vec::new(),
        }
    }

    #[test]
    fn filename_defaults_to_last_url_segment() {
        let job = job(JobRequest::new("http://host/files/archive.tar.gz?sig=1"));
        assert_eq!(job.filename(), "archive.tar.gz");
        assert_eq!(job.output_path(), PathBuf::from("./archive.tar.gz"));
    }

    #[test]
    fn filename_falls_back_when_url_has_no_segment() {
        let job = job(JobRequest::new("http://host/"));
        assert_eq!(job.filename(), FALLBACK_FILENAME);
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = DownloadJob::new(JobRequest::new("  ")).err().unwrap();
        assert_eq!(err.phase(), "config");
    }

    #[test]
    fn zero_threads_are_rejected() {
        let request =
            JobRequest::new("http://host/a").with_config(DownloadConfig::new().with_threads(0));
        assert!(matches!(
            DownloadJob::new(request),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unusable_pinned_filename_is_rejected() {
        let request = JobRequest::new("http://host/a").with_filename(Some("..".into()));
        assert!(DownloadJob::new(request).is_err());
    }

    #[test]
    fn chunk_paths_follow_filename() {
        let job = job(JobRequest::new("http://host/a.bin").with_output_dir("/tmp/out"));
        assert_eq!(job.chunk_path(3), PathBuf::from("/tmp/out/a.bin_3"));
        assert_eq!(job.output_path(), PathBuf::from("/tmp/out/a.bin"));
    }

    #[test]
    fn redirect_rewrites_url_and_default_filename() {
        let mut job = job(JobRequest::new("http://host/get?id=7"));
        let mut probed = report();
        probed.redirects.push(Redirect {
            url: "http://cdn/real.iso".into(),
            filename: Some("real.iso".into()),
        });
        job.apply_probe(&probed);
        assert_eq!(job.url(), "http://cdn/real.iso");
        assert_eq!(job.filename(), "real.iso");
    }

    #[test]
    fn pinned_filename_survives_redirect_and_server_name() {
        let mut job = job(JobRequest::new("http://host/a").with_filename(Some("mine.bin".into())));
        let mut probed = report();
        probed.server_filename = Some("theirs.bin".into());
        probed.redirects.push(Redirect {
            url: "http://cdn/other.bin".into(),
            filename: Some("other.bin".into()),
        });
        job.apply_probe(&probed);
        assert_eq!(job.url(), "http://cdn/other.bin");
        assert_eq!(job.filename(), "mine.bin");
    }

    #[test]
    fn server_filename_wins_over_redirect_name() {
        let mut job = job(JobRequest::new("http://host/a"));
        let mut probed = report();
        probed.server_filename = Some("report.pdf".into());
        probed.redirects.push(Redirect {
            url: "http://cdn/x".into(),
            filename: Some("x".into()),
        });
        probed.checksum = ExpectedMd5::parse("5eb63bbbe01eeed093cb22bb8f5acdc3");
        job.apply_probe(&probed);
        assert_eq!(job.filename(), "report.pdf");
        assert!(job.checksum().is_some());
        assert!(!job.is_done());
    }
}
