//! Append-only record log.
//!
//! Records are buffered in memory; once the buffered size crosses the flush
//! threshold the whole buffer is written to the backing file in a single
//! contiguous write and cleared. Records carry no framing of their own: the
//! file is the concatenation of record bytes in commit order.
//!
//! Two modes share the same contract:
//! - direct: the appending thread performs the file write under the buffer
//!   lock;
//! - worker: records are handed to a dedicated writer thread over a bounded
//!   channel. A full queue blocks the sender, which preserves append order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::LogError;

/// Bounded depth of the worker handoff queue.
const WORKER_QUEUE_DEPTH: usize = 1024;

enum Sink {
    Direct {
        file: File,
        buf: Vec<u8>,
    },
    Worker {
        tx: SyncSender<WorkerMsg>,
        handle: Option<JoinHandle<()>>,
    },
    Closed,
}

enum WorkerMsg {
    Record(Vec<u8>),
    Flush(SyncSender<Result<(), LogError>>),
}

/// Buffered append-only log over a single file.
pub struct AppendLog {
    sink: Mutex<Sink>,
    flush_threshold: usize,
    /// Bytes accepted so far (buffered or written).
    appended: AtomicU64,
}

impl AppendLog {
    /// Open (or create) the log at `path` in direct mode, truncating any
    /// previous contents. The log is write-only; replay is future work.
    pub fn open(path: impl AsRef<Path>, flush_threshold: usize) -> Result<Self, LogError> {
        let file = Self::open_file(path.as_ref())?;
        Ok(Self {
            sink: Mutex::new(Sink::Direct {
                file,
                buf: Vec::with_capacity(flush_threshold),
            }),
            flush_threshold,
            appended: AtomicU64::new(0),
        })
    }

    /// Open the log with a dedicated writer thread. Buffering and flushing
    /// move onto the worker; `add_record` only enqueues.
    pub fn open_with_worker(
        path: impl AsRef<Path>,
        flush_threshold: usize,
    ) -> Result<Self, LogError> {
        let file = Self::open_file(path.as_ref())?;
        let (tx, rx) = mpsc::sync_channel(WORKER_QUEUE_DEPTH);
        let handle = std::thread::Builder::new()
            .name("shoal-log-writer".to_string())
            .spawn(move || writer_loop(file, rx, flush_threshold))
            .map_err(LogError::Io)?;
        Ok(Self {
            sink: Mutex::new(Sink::Worker {
                tx,
                handle: Some(handle),
            }),
            flush_threshold,
            appended: AtomicU64::new(0),
        })
    }

    fn open_file(path: &Path) -> Result<File, LogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), "append log opened");
        Ok(file)
    }

    /// Append one record. Buffered until the flush threshold is crossed;
    /// then the whole buffer goes out in one write.
    pub fn add_record(&self, record: &[u8]) -> Result<(), LogError> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Direct { file, buf } => {
                buf.extend_from_slice(record);
                if buf.len() >= self.flush_threshold {
                    file.write_all(buf)?;
                    buf.clear();
                }
            }
            Sink::Worker { tx, .. } => {
                // A full queue blocks until the writer drains; order is
                // preserved because there is a single producer behind the
                // shard-set write lock.
                tx.send(WorkerMsg::Record(record.to_vec()))
                    .map_err(|_| LogError::WriterGone)?;
            }
            Sink::Closed => return Err(LogError::Closed),
        }
        self.appended.fetch_add(record.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Force buffered records out to the file.
    pub fn flush(&self) -> Result<(), LogError> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Direct { file, buf } => {
                if !buf.is_empty() {
                    file.write_all(buf)?;
                    buf.clear();
                }
                file.sync_data()?;
                Ok(())
            }
            Sink::Worker { tx, .. } => {
                let (ack_tx, ack_rx) = mpsc::sync_channel(1);
                tx.send(WorkerMsg::Flush(ack_tx))
                    .map_err(|_| LogError::WriterGone)?;
                ack_rx.recv().map_err(|_| LogError::WriterGone)?
            }
            Sink::Closed => Err(LogError::Closed),
        }
    }

    /// Flush and release the file handle. Further appends fail.
    pub fn close(&self) -> Result<(), LogError> {
        let mut sink = self.sink.lock();
        match std::mem::replace(&mut *sink, Sink::Closed) {
            Sink::Direct { mut file, buf } => {
                if !buf.is_empty() {
                    file.write_all(&buf)?;
                }
                file.sync_data()?;
                Ok(())
            }
            Sink::Worker { tx, handle } => {
                drop(tx);
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        return Err(LogError::WriterGone);
                    }
                }
                Ok(())
            }
            Sink::Closed => Ok(()),
        }
    }

    /// Total record bytes accepted (buffered or written).
    pub fn len(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for AppendLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "append log close failed on drop");
        }
    }
}

/// Writer thread: buffers records, flushing at the threshold, until the
/// channel closes; then drains the buffer and exits. A write failure ends
/// the loop — the next `add_record` observes the dead channel.
fn writer_loop(mut file: File, rx: Receiver<WorkerMsg>, flush_threshold: usize) {
    let mut buf: Vec<u8> = Vec::with_capacity(flush_threshold);
    for msg in rx {
        match msg {
            WorkerMsg::Record(record) => {
                buf.extend_from_slice(&record);
                if buf.len() >= flush_threshold {
                    if let Err(e) = file.write_all(&buf) {
                        warn!(error = %e, "log writer flush failed");
                        return;
                    }
                    buf.clear();
                }
            }
            WorkerMsg::Flush(ack) => {
                let result = (|| {
                    if !buf.is_empty() {
                        file.write_all(&buf)?;
                        buf.clear();
                    }
                    file.sync_data()?;
                    Ok(())
                })();
                // Receiver may have given up; losing the ack is fine.
                match ack.try_send(result.map_err(LogError::Io)) {
                    Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
                }
            }
        }
    }
    if !buf.is_empty() {
        if let Err(e) = file.write_all(&buf) {
            warn!(error = %e, "log writer final flush failed");
            return;
        }
    }
    let _ = file.sync_data();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_small_records_stay_buffered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open(&path, 4096).unwrap();

        log.add_record(b"hello").unwrap();
        assert_eq!(log.len(), 5);
        // Below the threshold: nothing on disk yet.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        log.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_threshold_crossing_flushes_whole_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open(&path, 8).unwrap();

        log.add_record(b"aaaa").unwrap();
        log.add_record(b"bbbb").unwrap();
        // 8 buffered bytes crossed the threshold in one contiguous write.
        assert_eq!(std::fs::read(&path).unwrap(), b"aaaabbbb");

        log.add_record(b"cc").unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_order_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open(&path, 4096).unwrap();

        for i in 0..100u8 {
            log.add_record(&[i]).unwrap();
        }
        log.flush().unwrap();

        let contents = std::fs::read(&path).unwrap();
        let expected: Vec<u8> = (0..100).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_close_flushes_and_rejects_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open(&path, 4096).unwrap();

        log.add_record(b"tail").unwrap();
        log.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"tail");

        assert!(matches!(log.add_record(b"x"), Err(LogError::Closed)));
        // Close is idempotent.
        log.close().unwrap();
    }

    #[test]
    fn test_worker_mode_preserves_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open_with_worker(&path, 16).unwrap();

        for i in 0..50u8 {
            log.add_record(&[i, i]).unwrap();
        }
        log.flush().unwrap();

        let contents = std::fs::read(&path).unwrap();
        let expected: Vec<u8> = (0..50).flat_map(|i| [i, i]).collect();
        assert_eq!(contents, expected);

        log.close().unwrap();
    }

    #[test]
    fn test_worker_close_drains_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.aof");
        let log = AppendLog::open_with_worker(&path, 1 << 20).unwrap();

        log.add_record(b"pending").unwrap();
        log.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"pending");
    }

    #[test]
    fn test_len_counts_appended_bytes() {
        let dir = tempdir().unwrap();
        let log = AppendLog::open(dir.path().join("records.aof"), 4096).unwrap();
        assert!(log.is_empty());
        log.add_record(&[0u8; 10]).unwrap();
        log.add_record(&[0u8; 5]).unwrap();
        assert_eq!(log.len(), 15);
    }
}
