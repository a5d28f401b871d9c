// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Disk-backed FIFO of byte records.
//!
//! ## File Layout
//!
//! ```text
//! <data_path>/
//! ├── <name>.diskqueue.000000.dat      # oldest unread segment
//! ├── <name>.diskqueue.000001.dat
//! ├── <name>.diskqueue.000002.dat      # current write segment
//! └── <name>.diskqueue.meta.json       # read/write cursors + depth
//!
//! Segment:
//! ┌─────────────────┬──────────────┬─────────────────┬──────────────┬───
//! │ len: u32 BE     │ record bytes │ len: u32 BE     │ record bytes │ ...
//! └─────────────────┴──────────────┴─────────────────┴──────────────┴───
//! ```
//!
//! A single worker task owns every file handle. Writers send requests over a
//! channel; the reader pulls records through a [`QueueReader`]. A record is
//! committed as read once it has been handed to the reader, so anything not
//! yet handed over is delivered again after a restart.
//!
//! A segment is rolled once it reaches `max_bytes_per_file` and deleted once
//! fully read. Cursors are persisted every `sync_every` operations, on the
//! `sync_timeout` ticker, and on close.
//!
//! ## Corruption
//!
//! A frame whose length falls outside `[min_msg_size, max_msg_size]`, or a
//! segment that ends mid-frame, makes the rest of that segment unreadable.
//! The segment is renamed to `*.bad` and reading continues with the next one.

use super::ConnectorFuture;
use crate::config::ConnectorConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Frame header size.
const FRAME_HEADER: u64 = 4;

/// Pull side of a durable queue.
///
/// `next` must be cancel-safe: dropping the returned future must not lose a
/// record. `None` means the queue has closed.
pub trait RecordStream: Send + 'static {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + '_>>;
}

impl RecordStream for mpsc::Receiver<Vec<u8>> {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + '_>> {
        Box::pin(self.recv())
    }
}

/// An ordered, append-only, persistent record queue.
pub trait DurableQueue: Send + Sync + 'static {
    /// Append one record.
    fn put(&self, record: Vec<u8>) -> ConnectorFuture<'_, ()>;

    /// The read side. Only the first call gets it.
    fn reader(&self) -> Option<Box<dyn RecordStream>>;

    /// Records appended but not yet read.
    fn depth(&self) -> u64;

    /// Persist cursors and stop. The read stream ends.
    fn close(&self) -> ConnectorFuture<'_, ()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Options and metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Disk queue tuning.
#[derive(Debug, Clone)]
pub struct DiskQueueOptions {
    pub data_path: PathBuf,
    pub name: String,
    pub max_bytes_per_file: u64,
    pub min_msg_size: u32,
    pub max_msg_size: u32,
    pub sync_every: u64,
    pub sync_timeout: Duration,
}

impl DiskQueueOptions {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            data_path: PathBuf::from(&config.queue_data_path),
            name: config.queue_name.clone(),
            max_bytes_per_file: config.max_bytes_per_file,
            min_msg_size: config.min_msg_size,
            max_msg_size: config.max_msg_size,
            sync_every: config.sync_every.max(1),
            sync_timeout: config.sync_timeout_duration(),
        }
    }

    /// Path of segment number `file`.
    pub fn segment_path(&self, file: u64) -> PathBuf {
        self.data_path
            .join(format!("{}.diskqueue.{:06}.dat", self.name, file))
    }

    fn meta_path(&self) -> PathBuf {
        self.data_path.join(format!("{}.diskqueue.meta.json", self.name))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Metadata {
    depth: u64,
    read_file: u64,
    read_pos: u64,
    write_file: u64,
    write_pos: u64,
}

fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn queue_err(context: &str, e: impl std::fmt::Display) -> ProxyError {
    ProxyError::Queue(format!("{}: {}", context, e))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

enum Request {
    Put {
        record: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        reply: oneshot::Sender<Vec<u8>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Segment-file queue served by one worker task.
pub struct DiskQueue {
    requests: mpsc::Sender<Request>,
    reader_taken: AtomicBool,
    depth: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskQueue {
    /// Open (or create) the queue under `options.data_path`.
    pub async fn open(options: DiskQueueOptions) -> Result<Self> {
        fs::create_dir_all(&options.data_path).await?;

        let meta = match fs::read(options.meta_path()).await {
            Ok(raw) => serde_json::from_slice::<Metadata>(&raw)
                .map_err(|e| queue_err("corrupt queue metadata", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Metadata::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %options.data_path.display(),
            name = %options.name,
            depth = meta.depth,
            read_file = meta.read_file,
            write_file = meta.write_file,
            "Opened disk queue"
        );

        let depth = Arc::new(AtomicU64::new(meta.depth));
        let (requests, rx) = mpsc::channel(64);
        let sync_timeout = options.sync_timeout;
        let worker = QueueWorker {
            opts: options,
            meta,
            depth: Arc::clone(&depth),
            writer: None,
            reader: None,
            read_file_len: None,
            next_read_pos: 0,
            unsynced: 0,
            needs_sync: false,
            waiting: None,
        };
        let handle = tokio::spawn(worker.run(rx, sync_timeout));

        Ok(Self {
            requests,
            reader_taken: AtomicBool::new(false),
            depth,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Open with options derived from connector configuration.
    pub async fn from_config(config: &ConnectorConfig) -> Result<Self> {
        Self::open(DiskQueueOptions::from_config(config)).await
    }
}

impl DurableQueue for DiskQueue {
    fn put(&self, record: Vec<u8>) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            let (reply, rx) = oneshot::channel();
            self.requests
                .send(Request::Put { record, reply })
                .await
                .map_err(|_| ProxyError::Queue("queue is closed".into()))?;
            rx.await
                .map_err(|_| ProxyError::Queue("queue worker stopped".into()))?
        })
    }

    fn reader(&self) -> Option<Box<dyn RecordStream>> {
        if self.reader_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Box::new(QueueReader {
            requests: self.requests.clone(),
            inflight: None,
        }))
    }

    fn depth(&self) -> u64 {
        self.depth.load(Ordering::Acquire)
    }

    fn close(&self) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            let (reply, rx) = oneshot::channel();
            if self.requests.send(Request::Close { reply }).await.is_err() {
                return Ok(()); // already closed
            }
            let result = rx
                .await
                .unwrap_or_else(|_| Err(ProxyError::Queue("queue worker stopped".into())));

            let worker = self.worker.lock().ok().and_then(|mut w| w.take());
            if let Some(worker) = worker {
                if let Err(e) = worker.await {
                    warn!(error = %e, "Disk queue worker ended abnormally");
                }
            }
            result
        })
    }
}

/// Read handle for a [`DiskQueue`].
///
/// At most one request is outstanding; its reply slot lives here rather than
/// in the future, which is what makes `next` cancel-safe.
pub struct QueueReader {
    requests: mpsc::Sender<Request>,
    inflight: Option<oneshot::Receiver<Vec<u8>>>,
}

impl QueueReader {
    async fn next_record(&mut self) -> Option<Vec<u8>> {
        if self.inflight.is_none() {
            let (reply, rx) = oneshot::channel();
            self.requests.send(Request::Read { reply }).await.ok()?;
            self.inflight = Some(rx);
        }
        let rx = self.inflight.as_mut()?;
        let record = rx.await.ok();
        self.inflight = None;
        record
    }
}

impl RecordStream for QueueReader {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + '_>> {
        Box::pin(self.next_record())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

struct QueueWorker {
    opts: DiskQueueOptions,
    meta: Metadata,
    depth: Arc<AtomicU64>,
    writer: Option<File>,
    reader: Option<BufReader<File>>,
    /// Size of the read segment once the writer has moved past it.
    read_file_len: Option<u64>,
    next_read_pos: u64,
    unsynced: u64,
    needs_sync: bool,
    waiting: Option<oneshot::Sender<Vec<u8>>>,
}

impl QueueWorker {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>, sync_timeout: Duration) {
        // interval() panics on a zero period.
        let mut ticker = tokio::time::interval(sync_timeout.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.serve_reader().await;

            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Put { record, reply }) => {
                        let result = self.write_record(&record).await;
                        metrics::record_queue_append(result.is_ok());
                        let _ = reply.send(result);
                    }
                    Some(Request::Read { reply }) => {
                        self.waiting = Some(reply);
                    }
                    Some(Request::Close { reply }) => {
                        let _ = reply.send(self.shutdown().await);
                        break;
                    }
                    None => {
                        if let Err(e) = self.shutdown().await {
                            error!(error = %e, "Disk queue shutdown failed");
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.needs_sync {
                        if let Err(e) = self.sync().await {
                            error!(error = %e, "Periodic disk queue sync failed");
                        }
                    }
                }
            }
        }
        debug!(name = %self.opts.name, "Disk queue worker stopped");
    }

    fn has_unread(&self) -> bool {
        (self.meta.read_file, self.meta.read_pos) < (self.meta.write_file, self.meta.write_pos)
    }

    fn publish_depth(&self) {
        self.depth.store(self.meta.depth, Ordering::Release);
        metrics::record_queue_depth(self.meta.depth);
    }

    /// Hand the next record to a waiting reader, if both exist.
    async fn serve_reader(&mut self) {
        while self.waiting.is_some() && self.has_unread() {
            let record = match self.read_one().await {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(e) => {
                    self.skip_corrupt_segment(e).await;
                    continue;
                }
            };

            let Some(reply) = self.waiting.take() else {
                return;
            };
            match reply.send(record) {
                Ok(()) => self.commit_read().await,
                Err(_) => {
                    // Reader went away; rewind so the record is read again.
                    self.reader = None;
                }
            }
            return;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write path
    // ─────────────────────────────────────────────────────────────────────────

    async fn open_writer(&mut self) -> Result<&mut File> {
        if self.writer.is_none() {
            let path = self.opts.segment_path(self.meta.write_file);
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;
            // Bytes past the persisted cursor were never acknowledged.
            if file.metadata().await?.len() > self.meta.write_pos {
                file.set_len(self.meta.write_pos).await?;
            }
            file.seek(SeekFrom::Start(self.meta.write_pos)).await?;
            self.writer = Some(file);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| ProxyError::Internal("writer missing after open".into()))
    }

    async fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let len = u32::try_from(record.len())
            .map_err(|_| ProxyError::Queue(format!("record of {} bytes is too large", record.len())))?;
        if len < self.opts.min_msg_size || len > self.opts.max_msg_size {
            return Err(ProxyError::Queue(format!(
                "invalid message size {} (allowed {}..={})",
                len, self.opts.min_msg_size, self.opts.max_msg_size
            )));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER as usize + record.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(record);

        let written = async {
            let writer = self.open_writer().await?;
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok::<(), ProxyError>(())
        }
        .await;
        if let Err(e) = written {
            // Reopening truncates any partial frame.
            self.writer = None;
            return Err(e);
        }

        self.meta.write_pos += frame.len() as u64;
        self.meta.depth += 1;
        self.publish_depth();
        self.mark_dirty().await;

        if self.meta.write_pos >= self.opts.max_bytes_per_file {
            self.roll_writer().await?;
        }
        Ok(())
    }

    async fn roll_writer(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.sync_all().await?;
        }
        let finished = self.meta.write_file;
        if self.meta.read_file == finished {
            self.read_file_len = Some(self.meta.write_pos);
        }
        self.meta.write_file += 1;
        self.meta.write_pos = 0;
        debug!(segment = finished, "Rolled disk queue segment");
        self.sync().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read path
    // ─────────────────────────────────────────────────────────────────────────

    async fn read_one(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if !self.has_unread() {
                return Ok(None);
            }

            if self.reader.is_none() {
                let path = self.opts.segment_path(self.meta.read_file);
                let mut file = File::open(&path).await?;
                file.seek(SeekFrom::Start(self.meta.read_pos)).await?;
                self.read_file_len = if self.meta.read_file < self.meta.write_file {
                    Some(file.metadata().await?.len())
                } else {
                    None
                };
                self.reader = Some(BufReader::new(file));
            }

            if let Some(len) = self.read_file_len {
                if self.meta.read_pos >= len {
                    self.finish_read_file().await;
                    continue;
                }
            }

            let Some(reader) = self.reader.as_mut() else {
                continue;
            };
            let size = reader.read_u32().await?;
            if size < self.opts.min_msg_size || size > self.opts.max_msg_size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame length {} out of bounds", size),
                ));
            }
            let mut record = vec![0u8; size as usize];
            reader.read_exact(&mut record).await?;

            self.next_read_pos = self.meta.read_pos + FRAME_HEADER + u64::from(size);
            return Ok(Some(record));
        }
    }

    async fn commit_read(&mut self) {
        self.meta.read_pos = self.next_read_pos;
        self.meta.depth = self.meta.depth.saturating_sub(1);
        if !self.has_unread() {
            self.meta.depth = 0;
        }
        self.publish_depth();

        if let Some(len) = self.read_file_len {
            if self.meta.read_pos >= len {
                self.finish_read_file().await;
            }
        }
        self.mark_dirty().await;
    }

    async fn finish_read_file(&mut self) {
        let done = self.meta.read_file;
        self.reader = None;
        self.read_file_len = None;
        self.meta.read_file += 1;
        self.meta.read_pos = 0;

        // Persist the cursor before the segment disappears.
        if let Err(e) = self.sync().await {
            error!(error = %e, "Disk queue sync failed");
            return;
        }
        let path = self.opts.segment_path(done);
        if let Err(e) = fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove read segment");
        }
    }

    async fn skip_corrupt_segment(&mut self, cause: std::io::Error) {
        let segment = self.meta.read_file;
        let path = self.opts.segment_path(segment);
        error!(path = %path.display(), error = %cause, "Corrupt disk queue segment, skipping");
        metrics::record_queue_corruption();

        self.reader = None;
        self.read_file_len = None;
        if segment == self.meta.write_file {
            self.writer = None;
            self.meta.write_file += 1;
            self.meta.write_pos = 0;
        }
        self.meta.read_file += 1;
        self.meta.read_pos = 0;
        // Whatever the bad segment held is gone; recount what is left.
        match self.count_unread().await {
            Ok(left) => self.meta.depth = left,
            Err(e) => {
                warn!(error = %e, "Cannot recount disk queue depth");
                if !self.has_unread() {
                    self.meta.depth = 0;
                }
            }
        }
        self.publish_depth();

        let bad = with_suffix(&path, ".bad");
        if let Err(e) = fs::rename(&path, &bad).await {
            warn!(path = %path.display(), error = %e, "Failed to quarantine corrupt segment");
        }
        if let Err(e) = self.sync().await {
            error!(error = %e, "Disk queue sync failed");
        }
    }

    /// Count the frames between the read and write cursors.
    async fn count_unread(&self) -> std::io::Result<u64> {
        let mut count = 0;
        for file in self.meta.read_file..=self.meta.write_file {
            let path = self.opts.segment_path(file);
            let end = if file == self.meta.write_file {
                self.meta.write_pos
            } else {
                match fs::metadata(&path).await {
                    Ok(m) => m.len(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                }
            };
            let mut pos = if file == self.meta.read_file { self.meta.read_pos } else { 0 };
            if pos >= end {
                continue;
            }

            let mut segment = File::open(&path).await?;
            segment.seek(SeekFrom::Start(pos)).await?;
            while pos < end {
                let size = segment.read_u32().await?;
                if size < self.opts.min_msg_size || size > self.opts.max_msg_size {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("frame length {} out of bounds", size),
                    ));
                }
                segment.seek(SeekFrom::Current(i64::from(size))).await?;
                pos += FRAME_HEADER + u64::from(size);
                count += 1;
            }
        }
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    async fn mark_dirty(&mut self) {
        self.unsynced += 1;
        self.needs_sync = true;
        if self.unsynced >= self.opts.sync_every {
            if let Err(e) = self.sync().await {
                error!(error = %e, "Disk queue sync failed");
            }
        }
    }

    async fn sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.sync_all().await?;
        }
        self.persist_metadata().await?;
        self.unsynced = 0;
        self.needs_sync = false;
        Ok(())
    }

    async fn persist_metadata(&self) -> Result<()> {
        let json = serde_json::to_vec(&self.meta).map_err(|e| queue_err("encode metadata", e))?;
        let path = self.opts.meta_path();
        let tmp = with_suffix(&path, ".tmp");

        let mut file = File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.waiting = None;
        let result = self.sync().await;
        self.writer = None;
        self.reader = None;
        info!(name = %self.opts.name, depth = self.meta.depth, "Disk queue closed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &std::path::Path) -> DiskQueueOptions {
        DiskQueueOptions {
            data_path: dir.to_path_buf(),
            name: "test".to_string(),
            max_bytes_per_file: 1024,
            min_msg_size: 4,
            max_msg_size: 256,
            sync_every: 1,
            sync_timeout: Duration::from_millis(20),
        }
    }

    fn rec(i: u32) -> Vec<u8> {
        format!("rec-{:03}", i).into_bytes()
    }

    async fn drain(reader: &mut Box<dyn RecordStream>, n: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for _ in 0..n {
            let r = tokio::time::timeout(Duration::from_secs(2), reader.next())
                .await
                .expect("read timed out")
                .expect("queue closed");
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn test_fifo_order_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(options(dir.path())).await.unwrap();

        for i in 0..5 {
            queue.put(rec(i)).await.unwrap();
        }
        assert_eq!(queue.depth(), 5);

        let mut reader = queue.reader().unwrap();
        assert!(queue.reader().is_none());

        let got = drain(&mut reader, 5).await;
        assert_eq!(got, (0..5).map(rec).collect::<Vec<_>>());

        queue.close().await.unwrap();
        assert_eq!(queue.depth(), 0);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_waits_for_writes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(DiskQueue::open(options(dir.path())).await.unwrap());
        let mut reader = queue.reader().unwrap();

        let pending = tokio::spawn(async move { reader.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put(rec(7)).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(rec(7)));
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unread_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = DiskQueue::open(options(dir.path())).await.unwrap();
            for i in 0..3 {
                queue.put(rec(i)).await.unwrap();
            }
            let mut reader = queue.reader().unwrap();
            assert_eq!(drain(&mut reader, 1).await, vec![rec(0)]);
            queue.close().await.unwrap();
        }

        let queue = DiskQueue::open(options(dir.path())).await.unwrap();
        assert_eq!(queue.depth(), 2);
        let mut reader = queue.reader().unwrap();
        assert_eq!(drain(&mut reader, 2).await, vec![rec(1), rec(2)]);
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_segments_roll_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        // 4-byte header + 7-byte record = 11 bytes per frame; two frames per segment.
        opts.max_bytes_per_file = 16;
        let queue = DiskQueue::open(opts.clone()).await.unwrap();

        for i in 0..5 {
            queue.put(rec(i)).await.unwrap();
        }
        assert!(opts.segment_path(0).exists());
        assert!(opts.segment_path(1).exists());
        assert!(opts.segment_path(2).exists());

        let mut reader = queue.reader().unwrap();
        assert_eq!(drain(&mut reader, 5).await, (0..5).map(rec).collect::<Vec<_>>());
        queue.close().await.unwrap();

        assert!(!opts.segment_path(0).exists());
        assert!(!opts.segment_path(1).exists());
        assert!(opts.segment_path(2).exists());
    }

    #[tokio::test]
    async fn test_size_limits_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(options(dir.path())).await.unwrap();

        let err = queue.put(vec![1, 2]).await.unwrap_err();
        assert!(matches!(err, ProxyError::Queue(_)));
        let err = queue.put(vec![0u8; 257]).await.unwrap_err();
        assert!(matches!(err, ProxyError::Queue(_)));

        assert_eq!(queue.depth(), 0);
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_segment_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.max_bytes_per_file = 16;
        {
            let queue = DiskQueue::open(opts.clone()).await.unwrap();
            for i in 0..5 {
                queue.put(rec(i)).await.unwrap();
            }
            queue.close().await.unwrap();
        }

        // Clobber the first frame header of segment 0.
        let seg0 = opts.segment_path(0);
        let mut bytes = std::fs::read(&seg0).unwrap();
        bytes[..4].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        std::fs::write(&seg0, bytes).unwrap();

        let queue = DiskQueue::open(opts.clone()).await.unwrap();
        let mut reader = queue.reader().unwrap();
        assert_eq!(drain(&mut reader, 3).await, vec![rec(2), rec(3), rec(4)]);
        queue.close().await.unwrap();

        assert!(with_suffix(&seg0, ".bad").exists());
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_segment_releases_lost_depth() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.max_bytes_per_file = 16;
        {
            let queue = DiskQueue::open(opts.clone()).await.unwrap();
            for i in 0..5 {
                queue.put(rec(i)).await.unwrap();
            }
            queue.close().await.unwrap();
        }

        let seg0 = opts.segment_path(0);
        let mut bytes = std::fs::read(&seg0).unwrap();
        bytes[..4].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        std::fs::write(&seg0, bytes).unwrap();

        let queue = DiskQueue::open(opts.clone()).await.unwrap();
        assert_eq!(queue.depth(), 5);
        let mut reader = queue.reader().unwrap();
        assert_eq!(drain(&mut reader, 1).await, vec![rec(2)]);
        // Two records went down with segment 0, one has been read.
        assert_eq!(queue.depth(), 2);
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_sync_persists_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.sync_every = 1_000;
        let queue = DiskQueue::open(opts.clone()).await.unwrap();

        queue.put(rec(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let raw = std::fs::read(opts.meta_path()).unwrap();
        let meta: Metadata = serde_json::from_slice(&raw).unwrap();
        assert_eq!(meta.depth, 1);
        assert_eq!(meta.write_pos, 11);
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_after_close_fails_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(options(dir.path())).await.unwrap();
        queue.close().await.unwrap();
        queue.close().await.unwrap();
        assert!(matches!(queue.put(rec(1)).await, Err(ProxyError::Queue(_))));
    }

    #[tokio::test]
    async fn test_dropped_read_future_loses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(options(dir.path())).await.unwrap();
        let mut reader = queue.reader().unwrap();

        // Abandon a read that is parked waiting for data.
        let parked = tokio::time::timeout(Duration::from_millis(20), reader.next()).await;
        assert!(parked.is_err());

        queue.put(rec(9)).await.unwrap();
        assert_eq!(drain(&mut reader, 1).await, vec![rec(9)]);
        queue.close().await.unwrap();
    }
}
