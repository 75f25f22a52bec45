//! The per-chunk fetch loop: connect, stream, retry, resume.
//!
//! A fetcher owns its chunk's temporary file and its [`ChunkState`]. Bytes are
//! always written at offset `bytes_read` within the file, so a restarted
//! response resumes exactly where the last one stopped and never rewrites or
//! overruns the chunk.

use std::io::SeekFrom;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::http::{BodyStream, RangeSource};
use crate::progress::DownloadProgress;
use crate::state::{ChunkState, ConnectionState};

/// Retry and buffering knobs for a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Largest slice written per write call.
    pub read_buffer_size: usize,
    /// Backoff after a failed connection attempt.
    pub retry_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up. `None` never gives up.
    pub max_retries: Option<u32>,
    /// Wall-clock budget for the chunk, if any.
    pub retry_deadline: Option<Duration>,
}

impl From<&DownloadConfig> for FetchOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size.max(1),
            retry_delay: config.retry_delay(),
            max_retries: config.max_retries,
            retry_deadline: config.retry_deadline(),
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

/// How a single response ended.
#[derive(Debug)]
enum StreamEnd {
    /// The chunk's range is fully written.
    Complete,
    /// The body failed before the range was complete.
    Interrupted(Error),
}

/// Everything a fetcher needs besides its output file.
pub struct ChunkFetcher<'a, S: RangeSource + ?Sized> {
    source: &'a S,
    url: &'a str,
    state: &'a ChunkState,
    options: &'a FetchOptions,
    progress: &'a dyn DownloadProgress,
    cancel: &'a CancellationToken,
}

impl<'a, S: RangeSource + ?Sized> ChunkFetcher<'a, S> {
    /// Creates a fetcher for the chunk described by `state`.
    pub fn new(
        source: &'a S,
        url: &'a str,
        state: &'a ChunkState,
        options: &'a FetchOptions,
        progress: &'a dyn DownloadProgress,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            source,
            url,
            state,
            options,
            progress,
            cancel,
        }
    }

    /// Fetches the chunk into `file`, returning the number of bytes written.
    ///
    /// Transient failures are retried with a fixed backoff until the range is
    /// complete or the configured cap or deadline is reached.
    ///
    /// # Errors
    ///
    /// - [`Error::UnderDelivered`] if a response ends before the range does.
    /// - [`Error::FetchExhausted`] if retries run out.
    /// - [`Error::Cancelled`] if the token fires.
    /// - Any non-transient request or file error.
    pub async fn run<W>(&self, file: &mut W) -> Result<u64>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        let result = self.fetch_loop(file).await;
        match &result {
            Ok(_) => self.state.set_state(ConnectionState::Complete),
            Err(Error::Cancelled) => {}
            Err(_) => self.state.set_state(ConnectionState::Failed),
        }
        result
    }

    async fn fetch_loop<W>(&self, file: &mut W) -> Result<u64>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        let range = *self.state.range();
        let Some(end) = range.end() else {
            log::trace!("[Chunk {}] empty range, nothing to fetch", range.index);
            return Ok(0);
        };

        let started = Instant::now();
        let mut failures = 0u32;

        loop {
            if self.state.is_complete() {
                file.flush().await?;
                log::debug!("[Chunk {}] complete, {} bytes", range.index, range.len);
                return Ok(range.len);
            }

            let before = self.state.bytes_read();
            let from = range.start + before;
            self.state.set_state(ConnectionState::Connecting);
            log::trace!("[Chunk {}] requesting bytes={from}-{end}", range.index);

            let opened = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                opened = self.source.open_range(self.url, from, end) => opened,
            };

            let failure = match opened {
                Ok(body) => {
                    self.state.mark_response_started();
                    match self.stream_body(body, file).await? {
                        StreamEnd::Complete => continue,
                        StreamEnd::Interrupted(e) => e,
                    }
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            let progressed = self.state.bytes_read() > before;
            if progressed {
                failures = 0;
            }
            failures += 1;

            let over_budget = self
                .options
                .retry_deadline
                .is_some_and(|deadline| started.elapsed() >= deadline);
            let out_of_attempts = self.options.max_retries.is_some_and(|max| failures > max);
            if over_budget || out_of_attempts {
                log::error!(
                    "[Chunk {}] giving up after {failures} failed attempt(s): {failure}",
                    range.index
                );
                return Err(Error::FetchExhausted {
                    chunk: range.index,
                    attempts: failures,
                    last_error: failure.to_string(),
                });
            }

            self.state.set_state(ConnectionState::Retrying);
            self.progress.on_chunk_retry(range.index, failures, &failure);

            if progressed {
                // The connection was working; resume right away from the new offset.
                log::warn!(
                    "[Chunk {}] stream interrupted at {} bytes, resuming: {failure}",
                    range.index,
                    self.state.bytes_read()
                );
            } else {
                log::warn!(
                    "[Chunk {}] attempt {failures} failed, retrying in {:?}: {failure}",
                    range.index,
                    self.options.retry_delay
                );
                tokio::select! {
                    () = self.cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(self.options.retry_delay) => {}
                }
            }
        }
    }

    /// Copies one response body into the chunk file.
    ///
    /// Returns `Err` only for fatal conditions; a broken body is reported as
    /// [`StreamEnd::Interrupted`] so the caller can reconnect.
    async fn stream_body<W>(&self, mut body: BodyStream, file: &mut W) -> Result<StreamEnd>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        let range = *self.state.range();

        loop {
            if self.state.is_complete() {
                // Anything the server still has queued is beyond our range.
                return Ok(StreamEnd::Complete);
            }

            let item = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                item = body.next() => item,
            };

            let bytes = match item {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Ok(StreamEnd::Interrupted(e)),
                None => {
                    let received = self.state.bytes_read();
                    log::error!(
                        "[Chunk {}] server closed the stream at {received} of {} bytes",
                        range.index,
                        range.len
                    );
                    return Err(Error::UnderDelivered {
                        chunk: range.index,
                        expected: range.len,
                        received,
                    });
                }
            };

            let left = self.state.remaining();
            let keep = usize::try_from(left).map_or(bytes.len(), |left| bytes.len().min(left));
            if keep < bytes.len() {
                log::warn!(
                    "[Chunk {}] server sent {} bytes past the end of the range, discarding",
                    range.index,
                    bytes.len() - keep
                );
            }

            for piece in bytes[..keep].chunks(self.options.read_buffer_size) {
                file.seek(SeekFrom::Start(self.state.bytes_read())).await?;
                file.write_all(piece).await?;
                self.state.add_bytes(piece.len() as u64);
            }
        }
    }
}
