//! Range query engine
//!
//! Scans an ordered list of log files for one topic inside a time window and
//! yields one newline-terminated JSON line per selected message.
//!
//! ```text
//! files ──► file bounds overlap? ──► chunk index overlaps? ──► decompress chunk
//!                                                               │
//!              line ◄── decode ◄── decimate ◄── in window? ◄── channel match?
//! ```
//!
//! The iterator is pull-based: a chunk is only decompressed when every line
//! from the previous one has been consumed, so a slow consumer stops the scan
//! instead of growing a buffer. Unreadable files are skipped.

use mcap::records::ChunkIndex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use super::cache::ReaderCache;
use super::decode::render_line;
use super::error::{StorageError, StorageResult};
use super::reader::LogReader;
use super::types::{ChannelMeta, Decimator, RangeParams, TimeWindow};

/// Counters describing how much of the input a query touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub chunks_scanned: usize,
    pub chunks_skipped: usize,
    pub lines_emitted: u64,
}

struct FileCursor {
    path: PathBuf,
    channels: HashMap<u16, Arc<ChannelMeta>>,
    chunks: VecDeque<ChunkIndex>,
}

struct PendingMessage {
    channel: Arc<ChannelMeta>,
    log_time: u64,
    data: Vec<u8>,
}

/// A lazy, finite, non-restartable range scan
pub struct RangeQuery<'c> {
    cache: &'c mut ReaderCache<LogReader>,
    files: std::vec::IntoIter<PathBuf>,
    topic: String,
    window: TimeWindow,
    decimator: Decimator,
    cursor: Option<FileCursor>,
    pending: VecDeque<PendingMessage>,
    stats: ScanStats,
}

impl<'c> RangeQuery<'c> {
    /// Prepare a scan; no file is touched until the first `next()`
    pub fn new(cache: &'c mut ReaderCache<LogReader>, params: &RangeParams) -> Self {
        Self {
            cache,
            files: params.files.clone().into_iter(),
            topic: params.topic.clone(),
            window: params.window,
            decimator: Decimator::new(params.decimate),
            cursor: None,
            pending: VecDeque::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Position on a new file, or `None` if it can't contribute
    fn open_cursor(&mut self, path: PathBuf) -> Option<FileCursor> {
        let reader = match self.cache.get_reader(&path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                self.stats.files_skipped += 1;
                return None;
            }
        };

        let overlaps = reader
            .time_bounds()
            .map(|(start, end)| self.window.overlaps_nanos(start, end))
            .unwrap_or(false);
        if !overlaps {
            self.stats.files_skipped += 1;
            return None;
        }

        // Channel ids are file-local; resolve the topic again for every file
        let channels: HashMap<u16, Arc<ChannelMeta>> = reader
            .channels()
            .into_iter()
            .filter(|channel| channel.topic == self.topic)
            .map(|channel| (channel.id, Arc::new(channel)))
            .collect();
        if channels.is_empty() {
            self.stats.files_skipped += 1;
            return None;
        }

        let total = reader.chunk_indexes().len();
        let mut chunks: Vec<ChunkIndex> = reader
            .chunk_indexes()
            .iter()
            .filter(|idx| {
                self.window
                    .overlaps_nanos(idx.message_start_time, idx.message_end_time)
            })
            .cloned()
            .collect();
        chunks.sort_by_key(|idx| idx.message_start_time);

        self.stats.files_scanned += 1;
        self.stats.chunks_skipped += total - chunks.len();

        Some(FileCursor {
            path,
            channels,
            chunks: chunks.into(),
        })
    }

    /// Decompress one chunk and queue its selected messages
    fn scan_chunk(&mut self, index: &ChunkIndex) {
        let Some(cursor) = self.cursor.as_ref() else {
            return;
        };

        let reader = match self.cache.get_reader(&cursor.path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(path = %cursor.path.display(), error = %e, "Reader lost mid-scan");
                self.cursor = None;
                return;
            }
        };

        let mut abandon = false;
        match reader.chunk_messages(index) {
            Ok(messages) => {
                self.stats.chunks_scanned += 1;
                for message in messages {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::debug!(path = %cursor.path.display(), error = %e, "Corrupt chunk, skipping rest of file");
                            abandon = true;
                            break;
                        }
                    };

                    let Some(channel) = cursor.channels.get(&message.channel.id) else {
                        continue;
                    };
                    if !self.window.contains_nanos(message.log_time) {
                        continue;
                    }
                    if !self.decimator.admit() {
                        continue;
                    }

                    self.pending.push_back(PendingMessage {
                        channel: Arc::clone(channel),
                        log_time: message.log_time,
                        data: message.data.into_owned(),
                    });
                }
            }
            Err(e) => {
                tracing::debug!(path = %cursor.path.display(), error = %e, "Unreadable chunk, skipping rest of file");
                abandon = true;
            }
        }

        if abandon {
            self.cursor = None;
        }
    }
}

impl Iterator for RangeQuery<'_> {
    type Item = StorageResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                self.stats.lines_emitted += 1;
                return Some(
                    render_line(&message.channel, message.log_time, &message.data)
                        .map_err(StorageError::from),
                );
            }

            let next_chunk = self.cursor.as_mut().and_then(|c| c.chunks.pop_front());
            match next_chunk {
                Some(index) => self.scan_chunk(&index),
                None => {
                    let path = self.files.next()?;
                    self.cursor = self.open_cursor(path);
                }
            }
        }
    }
}
