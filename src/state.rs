//! Live per-chunk counters shared between fetchers and the progress aggregator.
//!
//! Every field has exactly one writer (the owning fetcher) and any number of
//! readers. Readers only need eventually-consistent values, so plain atomics
//! are enough.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::plan::{ChunkRange, DownloadPlan};

/// Connection state of a chunk as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting for a response.
    Connecting = 0,
    /// Receiving body bytes.
    Connected = 1,
    /// Backing off after a transient failure.
    Retrying = 2,
    /// Range fully written.
    Complete = 3,
    /// Gave up with a fatal error.
    Failed = 4,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Retrying,
            3 => Self::Complete,
            4 => Self::Failed,
            _ => Self::Connecting,
        }
    }

    /// Short label for text rendering.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Retrying => "Retrying",
            Self::Complete => "Done",
            Self::Failed => "Failed",
        }
    }
}

/// Mutable progress of one chunk.
#[derive(Debug)]
pub struct ChunkState {
    range: ChunkRange,
    bytes_read: AtomicU64,
    retrying: AtomicBool,
    state: AtomicU8,
}

impl ChunkState {
    /// Creates the state for `range`. Empty ranges start out complete.
    #[must_use]
    pub fn new(range: ChunkRange) -> Self {
        let initial = if range.is_empty() {
            ConnectionState::Complete
        } else {
            ConnectionState::Connecting
        };
        Self {
            range,
            bytes_read: AtomicU64::new(0),
            retrying: AtomicBool::new(false),
            state: AtomicU8::new(initial as u8),
        }
    }

    /// The byte range this chunk covers.
    #[must_use]
    pub const fn range(&self) -> &ChunkRange {
        &self.range
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }

    /// Bytes still missing from the range.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.range.len.saturating_sub(self.bytes_read())
    }

    /// True when the whole range has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Whether the fetcher is between failed attempts.
    #[must_use]
    pub fn is_retrying(&self) -> bool {
        self.retrying.load(Ordering::Acquire)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Takes a consistent-enough copy for rendering.
    #[must_use]
    pub fn snapshot(&self) -> ChunkSnapshot {
        ChunkSnapshot {
            index: self.range.index,
            size: self.range.len,
            bytes_read: self.bytes_read(),
            state: self.connection_state(),
        }
    }

    // Writer side: only the owning fetcher calls these.

    pub(crate) fn add_bytes(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.retrying
            .store(state == ConnectionState::Retrying, Ordering::Release);
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn mark_response_started(&self) {
        self.set_state(ConnectionState::Connected);
    }
}

/// Read-only copy of a chunk's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSnapshot {
    /// Chunk index.
    pub index: usize,
    /// Bytes in the chunk's range.
    pub size: u64,
    /// Bytes written so far.
    pub bytes_read: u64,
    /// Connection state.
    pub state: ConnectionState,
}

/// Read-only view over a set of chunks, as consumed by the progress aggregator.
pub trait ProgressSource: Send + Sync {
    /// Number of chunks.
    fn chunk_count(&self) -> usize;

    /// Snapshot of chunk `index`.
    fn snapshot(&self, index: usize) -> ChunkSnapshot;
}

/// The chunk states of one job, in plan order.
#[derive(Debug, Clone)]
pub struct ChunkStates {
    chunks: Arc<[Arc<ChunkState>]>,
}

impl ChunkStates {
    /// Allocates one state per chunk of `plan`.
    #[must_use]
    pub fn from_plan(plan: &DownloadPlan) -> Self {
        let chunks: Vec<_> = plan
            .chunks()
            .iter()
            .map(|range| Arc::new(ChunkState::new(*range)))
            .collect();
        Self {
            chunks: chunks.into(),
        }
    }

    /// Iterates chunk states in plan order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChunkState>> {
        self.chunks.iter()
    }
}

impl ProgressSource for ChunkStates {
    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn snapshot(&self, index: usize) -> ChunkSnapshot {
        self.chunks[index].snapshot()
    }
}
