//! Concatenating chunk files into the final output and verifying its digest.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::checksum::{ChecksumStatus, ExpectedMd5, Md5Digest};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::plan::ChunkRange;
use crate::progress::DownloadProgress;

/// A completed chunk ready to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// The range the file holds.
    pub range: ChunkRange,
    /// Temporary file written by the chunk's fetcher.
    pub path: PathBuf,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Final output path.
    pub path: PathBuf,
    /// Bytes written to the output.
    pub bytes_written: u64,
    /// Digest comparison result.
    pub checksum: ChecksumStatus,
}

/// Options controlling how the output is written.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Write through `{output}.part` and rename on success.
    pub atomic: bool,
    /// Size of the copy buffer.
    pub buffer_size: usize,
}

/// Returns the `.part` path used while the output is being assembled.
#[must_use]
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn merge_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Merge {
        path: path.to_path_buf(),
        source,
    }
}

/// Concatenates chunk files into `output` in ascending offset order, deleting
/// each chunk file once it has been copied.
///
/// When `expected` is set the merged bytes are digested and compared; a
/// mismatch is reported in the outcome, never as an error.
///
/// # Errors
///
/// Returns [`Error::Merge`] if any open, read, write, delete or rename fails,
/// or if the chunks do not tile the output contiguously. Output written so far
/// is left on disk.
pub async fn merge_chunks<F: FileSystem + ?Sized>(
    fs: &F,
    chunks: &[ChunkFile],
    output: &Path,
    expected: Option<&ExpectedMd5>,
    options: MergeOptions,
    progress: &dyn DownloadProgress,
) -> Result<MergeOutcome> {
    let mut ordered: Vec<&ChunkFile> = chunks.iter().collect();
    ordered.sort_by_key(|c| (c.range.start, c.range.index));

    let target = if options.atomic {
        part_path(output)
    } else {
        output.to_path_buf()
    };
    let mut out = fs.create_file(&target, 0).await.map_err(merge_err(&target))?;
    let mut digest = expected.map(|_| Md5Digest::new());
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut written = 0u64;

    log::info!("Merging {} chunk(s) into {}", ordered.len(), output.display());

    for chunk in ordered {
        // Degenerate chunks sit at the end of the resource with nothing to copy.
        if chunk.range.start != written {
            return Err(Error::Merge {
                path: chunk.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "chunk {} starts at {} but output is at {written}",
                        chunk.range.index, chunk.range.start
                    ),
                ),
            });
        }

        let mut part = fs
            .open_read(&chunk.path)
            .await
            .map_err(merge_err(&chunk.path))?;
        let mut copied = 0u64;
        while copied < chunk.range.len {
            let want = usize::try_from(chunk.range.len - copied)
                .map_or(buf.len(), |left| left.min(buf.len()));
            let n = part
                .read(&mut buf[..want])
                .await
                .map_err(merge_err(&chunk.path))?;
            if n == 0 {
                return Err(Error::Merge {
                    path: chunk.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("chunk file holds {copied} of {} bytes", chunk.range.len),
                    ),
                });
            }
            if let Some(digest) = digest.as_mut() {
                digest.update(&buf[..n]);
            }
            out.write_all(&buf[..n]).await.map_err(merge_err(&target))?;
            copied += n as u64;
        }
        drop(part);

        written += copied;
        fs.remove_file(&chunk.path)
            .await
            .map_err(merge_err(&chunk.path))?;
        log::debug!("Merged chunk {} ({copied} bytes)", chunk.range.index);
        progress.on_merge_chunk(chunk.range.index, copied);
    }

    out.flush().await.map_err(merge_err(&target))?;
    out.sync_all().await.map_err(merge_err(&target))?;
    drop(out);

    if options.atomic {
        fs.rename_file(&target, output)
            .await
            .map_err(merge_err(output))?;
    }

    let checksum = ChecksumStatus::compare(expected, digest.map(Md5Digest::finish));
    match &checksum {
        ChecksumStatus::Match { digest } => log::info!("MD5 verified: {digest}"),
        ChecksumStatus::Mismatch { expected, actual } => {
            log::warn!("MD5 mismatch for {}: expected {expected}, got {actual}", output.display());
        }
        ChecksumStatus::NotProvided => {}
    }

    Ok(MergeOutcome {
        path: output.to_path_buf(),
        bytes_written: written,
        checksum,
    })
}
