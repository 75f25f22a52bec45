//! Progress sampling and reporting.
//!
//! The aggregator only ever reads [`ChunkSnapshot`]s through a
//! [`ProgressSource`]; it takes no locks and never blocks a fetcher.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::barrier::{BarrierGuard, CompletionBarrier};
use crate::download::DownloadReport;
use crate::error::Error;
use crate::format::{format_bytes, format_rate, text_bar};
use crate::plan::DownloadPlan;
use crate::probe::ProbeReport;
use crate::state::{ChunkSnapshot, ConnectionState, ProgressSource};
use crate::stats::TransferTracker;

/// Width of the text bars produced by [`ProgressFrame::render_lines`].
pub const BAR_WIDTH: usize = 50;

/// Trait for receiving download progress updates.
///
/// All methods have default no-op implementations for convenience.
pub trait DownloadProgress: Send + Sync {
    /// Called once the capability probe has succeeded.
    fn on_probe(&self, _report: &ProbeReport) {}

    /// Called when the range plan is fixed, before any fetch starts.
    fn on_plan(&self, _plan: &DownloadPlan) {}

    /// Called with every sampled frame, including the final one.
    fn on_frame(&self, _frame: &ProgressFrame) {}

    /// Called when a chunk hits a transient failure and is about to retry.
    fn on_chunk_retry(&self, _chunk: usize, _attempt: u32, _error: &Error) {}

    /// Called after a chunk file has been appended to the output.
    fn on_merge_chunk(&self, _chunk: usize, _bytes: u64) {}

    /// Called once the output file is in place.
    fn on_complete(&self, _report: &DownloadReport) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// One chunk's line in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkLine {
    /// Chunk index.
    pub index: usize,
    /// Bytes in the chunk's range.
    pub size: u64,
    /// Bytes written so far.
    pub bytes_read: u64,
    /// Bytes per second since the previous sample.
    pub rate: f64,
    /// Connection state at sampling time.
    pub state: ConnectionState,
}

impl ChunkLine {
    /// Completed share of the chunk in `0.0..=1.0`. Empty chunks count as done.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.size == 0 {
            1.0
        } else {
            self.bytes_read as f64 / self.size as f64
        }
    }
}

/// A sampled view of all chunks plus aggregate totals.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressFrame {
    /// Per-chunk lines in plan order.
    pub chunks: Vec<ChunkLine>,
    /// Sum of bytes written.
    pub bytes_read: u64,
    /// Sum of chunk sizes.
    pub total_size: u64,
    /// Sum of per-chunk rates.
    pub rate: f64,
}

impl ProgressFrame {
    /// Completed share of the whole download in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            1.0
        } else {
            self.bytes_read as f64 / self.total_size as f64
        }
    }

    /// True once every chunk has written its full range.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_read == self.total_size
    }

    /// Renders one fixed-width line per chunk followed by a total line.
    #[must_use]
    pub fn render_lines(&self, width: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .chunks
            .iter()
            .map(|c| {
                format!(
                    "Chunk {:>3} {} {:>6.2}% {} / {} @ {} {}",
                    c.index + 1,
                    text_bar(c.fraction(), width),
                    c.fraction() * 100.0,
                    format_bytes(c.bytes_read),
                    format_bytes(c.size),
                    format_rate(c.rate),
                    c.state.label(),
                )
            })
            .collect();
        lines.push(format!(
            "Total     {} {:>6.2}% {} / {} @ {}",
            text_bar(self.fraction(), width),
            self.fraction() * 100.0,
            format_bytes(self.bytes_read),
            format_bytes(self.total_size),
            format_rate(self.rate),
        ));
        lines
    }
}

/// Turns successive snapshots into frames with instantaneous rates.
#[derive(Debug)]
pub struct ProgressAggregator {
    previous: Vec<u64>,
    interval: Duration,
}

impl ProgressAggregator {
    /// Creates an aggregator for `chunks` chunks sampled every `interval`.
    #[must_use]
    pub fn new(chunks: usize, interval: Duration) -> Self {
        Self {
            previous: vec![0; chunks],
            interval,
        }
    }

    /// Samples every chunk once and computes rates against the previous sample.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&mut self, source: &dyn ProgressSource) -> ProgressFrame {
        let secs = self.interval.as_secs_f64().max(f64::EPSILON);
        let count = source.chunk_count();
        self.previous.resize(count, 0);

        let chunks: Vec<ChunkLine> = (0..count)
            .map(|i| {
                let ChunkSnapshot {
                    index,
                    size,
                    bytes_read,
                    state,
                } = source.snapshot(i);
                let delta = bytes_read.saturating_sub(self.previous[i]);
                self.previous[i] = bytes_read;
                ChunkLine {
                    index,
                    size,
                    bytes_read,
                    rate: delta as f64 / secs,
                    state,
                }
            })
            .collect();

        ProgressFrame {
            bytes_read: chunks.iter().map(|c| c.bytes_read).sum(),
            total_size: chunks.iter().map(|c| c.size).sum(),
            rate: chunks.iter().map(|c| c.rate).sum(),
            chunks,
        }
    }
}

/// Samples `source` every `interval` until only the aggregator's own barrier
/// slot remains, then emits one final frame and releases its slot.
///
/// `slot` must have been registered on `barrier` before the fetchers were
/// spawned, so the count cannot reach one while fetchers are still starting.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub async fn run_aggregator(
    source: &dyn ProgressSource,
    barrier: &CompletionBarrier,
    slot: BarrierGuard,
    interval: Duration,
    progress: &dyn DownloadProgress,
    tracker: &TransferTracker,
    cancel: &CancellationToken,
) {
    let _slot = slot;
    let mut aggregator = ProgressAggregator::new(source.chunk_count(), interval);

    loop {
        let final_pass = barrier.count() <= 1 || cancel.is_cancelled();
        let frame = aggregator.sample(source);
        tracker.update_speed(frame.rate as u64);
        progress.on_frame(&frame);
        if final_pass {
            log::debug!(
                "Progress aggregator done at {} / {}",
                frame.bytes_read,
                frame.total_size
            );
            break;
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = barrier.wait_until_at_most(1) => {}
            () = cancel.cancelled() => {}
        }
    }
}
