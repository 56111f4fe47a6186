//! Log file reader
//!
//! Opens an MCAP log file through a read-only memory map and parses only its
//! summary section (statistics, channels, schemas, chunk indexes). Chunk
//! contents are decompressed on demand while a range query scans them.
//!
//! Layout of the parts we touch:
//! ```text
//! ┌──────────────────────────────┐
//! │ magic + header               │
//! ├──────────────────────────────┤
//! │ chunks (compressed messages) │  ← read only when a chunk index overlaps
//! ├──────────────────────────────┤
//! │ summary: schemas, channels,  │  ← parsed on open
//! │ statistics, chunk indexes    │
//! ├──────────────────────────────┤
//! │ footer + magic               │
//! └──────────────────────────────┘
//! ```

use mcap::records::ChunkIndex;
use mcap::{Message, Summary};
use memmap2::Mmap;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::cache::CachedReader;
use super::error::{StorageError, StorageResult};
use super::types::{ChannelMeta, ChannelRef};

/// An open, summary-parsed log file
pub struct LogReader {
    path: PathBuf,
    mmap: Mmap,
    summary: Summary,
}

impl LogReader {
    /// Map a log file and parse its summary section
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // SAFETY: log files are immutable once published by the recorder; the
        // mapping is read-only and never outlives this reader.
        let mmap = unsafe { Mmap::map(&file)? };

        let summary = Summary::read(&mmap[..])
            .map_err(|e| StorageError::mcap(&path, e))?
            .ok_or_else(|| StorageError::MissingSummary(path.clone()))?;

        tracing::trace!(
            path = %path.display(),
            chunks = summary.chunk_indexes.len(),
            channels = summary.channels.len(),
            "Opened log reader"
        );

        Ok(Self {
            path,
            mmap,
            summary,
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Earliest and latest message log time in nanoseconds
    ///
    /// Uses the statistics record when present, otherwise the union of all
    /// chunk index bounds. `None` means the file holds no indexed messages.
    pub fn time_bounds(&self) -> Option<(u64, u64)> {
        if let Some(stats) = &self.summary.stats {
            if stats.message_count > 0 {
                return Some((stats.message_start_time, stats.message_end_time));
            }
        }

        self.summary
            .chunk_indexes
            .iter()
            .fold(None, |bounds, idx| match bounds {
                None => Some((idx.message_start_time, idx.message_end_time)),
                Some((start, end)) => Some((
                    start.min(idx.message_start_time),
                    end.max(idx.message_end_time),
                )),
            })
    }

    /// All channels declared in this file, ordered by id
    pub fn channels(&self) -> Vec<ChannelMeta> {
        let mut channels: Vec<ChannelMeta> = self
            .summary
            .channels
            .values()
            .map(|channel| ChannelMeta {
                id: channel.id,
                topic: channel.topic.clone(),
                message_encoding: channel.message_encoding.clone(),
                schema_name: channel.schema.as_ref().map(|s| s.name.clone()),
            })
            .collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    /// Ids of every channel bound to `topic` in this file
    pub fn channel_ids(&self, topic: &str) -> HashSet<u16> {
        self.summary
            .channels
            .values()
            .filter(|channel| channel.topic == topic)
            .map(|channel| channel.id)
            .collect()
    }

    /// Chunk indexes in file order
    pub fn chunk_indexes(&self) -> &[ChunkIndex] {
        &self.summary.chunk_indexes
    }

    /// Decompress one chunk and iterate its messages in stored order
    pub fn chunk_messages<'a>(
        &'a self,
        index: &ChunkIndex,
    ) -> StorageResult<impl Iterator<Item = StorageResult<Message<'a>>> + 'a> {
        let path = self.path.as_path();
        let messages = self
            .summary
            .stream_chunk(&self.mmap[..], index)
            .map_err(|e| StorageError::mcap(path, e))?;

        Ok(messages.map(move |message| message.map_err(|e| StorageError::mcap(path, e))))
    }

    /// Release the mapping
    pub fn close(self) {
        tracing::trace!(path = %self.path.display(), "Closed log reader");
        drop(self.mmap);
    }
}

impl CachedReader for LogReader {
    fn open(path: &Path) -> StorageResult<Self> {
        LogReader::open(path)
    }

    fn close(self) {
        LogReader::close(self)
    }
}

/// Find the first file (in the given order) that binds `topic` to a channel
///
/// Unreadable files are skipped. Readers opened here are closed before
/// returning; they are not added to any worker's cache.
pub fn probe_channel(files: &[PathBuf], topic: &str) -> Option<ChannelRef> {
    for path in files {
        let reader = match LogReader::open(path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable file during probe");
                continue;
            }
        };

        let found = reader.channel_ids(topic).into_iter().min();
        reader.close();

        if let Some(channel_id) = found {
            return Some(ChannelRef {
                path: path.clone(),
                channel_id,
                topic: topic.to_string(),
            });
        }
    }

    None
}
