//! Splitting a resource into contiguous byte ranges.

/// One contiguous byte range of the remote resource.
///
/// The offset is stored with the chunk so that merge order never depends on
/// the index alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Position of this chunk in the plan.
    pub index: usize,
    /// First byte of the range in the remote resource.
    pub start: u64,
    /// Number of bytes in the range. Zero for a degenerate chunk.
    pub len: u64,
}

impl ChunkRange {
    /// Inclusive last byte of the range, or `None` when the range is empty.
    #[must_use]
    pub const fn end(&self) -> Option<u64> {
        if self.len == 0 {
            None
        } else {
            Some(self.start + self.len - 1)
        }
    }

    /// One past the last byte of the range.
    #[must_use]
    pub const fn end_exclusive(&self) -> u64 {
        self.start + self.len
    }

    /// True when the range holds no bytes and needs no fetch.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

}

/// An immutable partition of `[0, total_size)` into ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    total_size: u64,
    chunks: Vec<ChunkRange>,
}

impl DownloadPlan {
    /// Splits `total_size` bytes into `threads` ranges.
    ///
    /// Every range gets `total_size / threads` bytes and the last one absorbs
    /// the remainder. When there are more threads than bytes, the first
    /// `total_size` chunks get one byte each and the rest are empty ranges
    /// positioned at `total_size`.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    #[must_use]
    pub fn new(total_size: u64, threads: usize) -> Self {
        assert!(threads > 0, "a plan needs at least one chunk");
        let n = threads as u64;

        let chunks = if n > total_size {
            (0..threads)
                .map(|index| {
                    let i = index as u64;
                    if i < total_size {
                        ChunkRange { index, start: i, len: 1 }
                    } else {
                        ChunkRange { index, start: total_size, len: 0 }
                    }
                })
                .collect()
        } else {
            let chunk_size = total_size / n;
            (0..threads)
                .map(|index| {
                    let start = index as u64 * chunk_size;
                    let len = if index == threads - 1 {
                        total_size - start
                    } else {
                        chunk_size
                    };
                    ChunkRange { index, start, len }
                })
                .collect()
        };

        Self { total_size, chunks }
    }

    /// Total resource size in bytes.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks, empty ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True for a plan without chunks. Never the case for a constructed plan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in ascending offset order.
    #[must_use]
    pub fn chunks(&self) -> &[ChunkRange] {
        &self.chunks
    }
}
