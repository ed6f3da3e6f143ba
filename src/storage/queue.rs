//! # Durable Queue
//!
//! Append-only, line-oriented backlog of encoded readings.
//!
//! One payload per `\n`-terminated line, oldest first. [`DurableQueue::drain_all`]
//! hands every line to a [`PayloadSink`] and only clears the file once the
//! whole scan has completed, so a crash mid-drain re-delivers lines on the
//! next drain instead of losing them (at-least-once).
//!
//! Lines the sink fails to deliver are not dropped: from the first failure
//! onwards the remaining lines are copied to a re-queue file which then
//! replaces the backlog atomically.

use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Longest stored line handed to the sink; longer lines are truncated
pub const MAX_LINE_BYTES: usize = 512;

/// Suffix of the re-queue file written during a drain
const REQUEUE_SUFFIX: &str = "retry";

/// Receiver of drained payloads
///
/// Returning an error marks the payload as undelivered; it and every later
/// line are kept in the queue.
#[async_trait]
pub trait PayloadSink: Send {
    async fn deliver(&mut self, payload: &str) -> Result<()>;
}

/// Outcome of one drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Lines accepted by the sink
    pub delivered: usize,
    /// Lines kept in the queue for a later drain
    pub requeued: usize,
    /// Lines cut at [`MAX_LINE_BYTES`]
    pub truncated: usize,
}

/// File-backed FIFO of pending payloads
#[derive(Debug, Clone)]
pub struct DurableQueue {
    path: PathBuf,
}

impl DurableQueue {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one payload as a new line
    ///
    /// Best effort: a failed write is logged and the payload is lost.
    /// Returns whether the payload reached storage.
    pub fn append(&self, payload: &str) -> bool {
        match self.try_append(payload) {
            Ok(()) => {
                debug!("Saved payload to {}: {}", self.path.display(), payload);
                true
            }
            Err(e) => {
                error!("Failed to append data to {}: {}", self.path.display(), e);
                false
            }
        }
    }

    fn try_append(&self, payload: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", payload)?;
        file.flush()
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(_) => return 0,
        };

        BufReader::new(file)
            .split(b'\n')
            .filter_map(|line| line.ok())
            .filter(|line| !trim_line(line).is_empty())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver every stored line to `sink`, oldest first, then clear the queue
    ///
    /// A missing queue file is a no-op. The scanned file is removed once the
    /// scan completes; lines the sink did not accept are written back first.
    /// If the scan itself is interrupted by an I/O error the file is left in
    /// place and already delivered lines will be delivered again.
    pub async fn drain_all<S>(&self, sink: &mut S) -> DrainReport
    where
        S: PayloadSink + ?Sized,
    {
        let mut report = DrainReport::default();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                error!("Failed to open {}: {}", self.path.display(), e);
                return report;
            }
        };

        info!("Reading stored data...");

        let requeue_path = self.requeue_path();
        let mut requeue: Option<BufWriter<File>> = None;
        let mut requeue_failed = false;
        let mut scan_failed = false;

        let mut reader = BufReader::new(file);
        let mut line = Vec::with_capacity(MAX_LINE_BYTES);

        loop {
            let truncated = match read_bounded_line(&mut reader, &mut line, MAX_LINE_BYTES) {
                Ok(Some(truncated)) => truncated,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read {}: {}", self.path.display(), e);
                    scan_failed = true;
                    break;
                }
            };

            let bytes = trim_line(&line);
            if bytes.is_empty() {
                continue;
            }

            if truncated {
                warn!("Stored line exceeded {} bytes, truncated", MAX_LINE_BYTES);
                report.truncated += 1;
            }

            let payload = String::from_utf8_lossy(bytes);

            if requeue.is_none() {
                match sink.deliver(&payload).await {
                    Ok(()) => {
                        report.delivered += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("Delivery failed, keeping remaining stored data: {}", e);
                        match File::create(&requeue_path) {
                            Ok(file) => requeue = Some(BufWriter::new(file)),
                            Err(e) => {
                                error!("Failed to create {}: {}", requeue_path.display(), e);
                                requeue_failed = true;
                                break;
                            }
                        }
                    }
                }
            }

            if let Some(writer) = requeue.as_mut() {
                if let Err(e) = writer.write_all(bytes).and_then(|_| writer.write_all(b"\n")) {
                    error!("Failed to write {}: {}", requeue_path.display(), e);
                    requeue_failed = true;
                    break;
                }
                report.requeued += 1;
            }
        }

        drop(reader);

        if let Some(mut writer) = requeue.take() {
            if let Err(e) = writer.flush().and_then(|_| writer.get_ref().sync_all()) {
                error!("Failed to flush {}: {}", requeue_path.display(), e);
                requeue_failed = true;
            }
        }

        if scan_failed || requeue_failed {
            // The backlog still holds every line; the re-queue file is redundant.
            let _ = fs::remove_file(&requeue_path);
            warn!("Stored data kept in {}", self.path.display());
            return report;
        }

        let cleared = if report.requeued > 0 {
            fs::rename(&requeue_path, &self.path)
        } else {
            fs::remove_file(&self.path)
        };

        match cleared {
            Ok(()) if report.requeued > 0 => {
                info!("{} stored entries delivered, {} kept", report.delivered, report.requeued)
            }
            Ok(()) => info!("Stored data cleared ({} entries)", report.delivered),
            Err(e) => error!("Failed to clear {}: {}", self.path.display(), e),
        }

        report
    }

    fn requeue_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(REQUEUE_SUFFIX);
        PathBuf::from(name)
    }
}

/// Read one `\n`-terminated line, keeping at most `max` bytes of it
///
/// The rest of an over-long line is consumed and discarded.
///
/// # Returns
///
/// * `Ok(None)` - end of file, nothing read
/// * `Ok(Some(truncated))` - a line was read into `line`
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<Option<bool>> {
    line.clear();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(read_any.then_some(truncated));
        }
        read_any = true;

        let newline = available.iter().position(|&b| b == b'\n');
        let chunk = match newline {
            Some(end) => &available[..end],
            None => available,
        };

        let room = max.saturating_sub(line.len());
        if chunk.len() > room {
            truncated = true;
        }
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let used = chunk.len() + usize::from(newline.is_some());
        reader.consume(used);

        if newline.is_some() {
            return Ok(Some(truncated));
        }
    }
}

/// Strip a trailing carriage return
fn trim_line(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}


#[cfg(test)]
mod tests {
    use super::mocks::RecordingSink;
    use super::*;

    fn queue_in(dir: &tempfile::TempDir) -> DurableQueue {
        DurableQueue::new(dir.path().join("data.txt"))
    }

    #[tokio::test]
    async fn test_drain_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let mut sink = RecordingSink::new();

        let report = queue.drain_all(&mut sink).await;

        assert_eq!(report, DrainReport::default());
        assert_eq!(sink.attempts, 0);
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn test_drain_preserves_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let payloads: Vec<String> = (0..25).map(|i| format!(r#"{{"tmp":{}}}"#, i)).collect();

        for payload in &payloads {
            assert!(queue.append(payload));
        }
        assert_eq!(queue.len(), 25);

        let mut sink = RecordingSink::new();
        let report = queue.drain_all(&mut sink).await;

        assert_eq!(sink.delivered, payloads);
        assert_eq!(report.delivered, 25);
        assert_eq!(report.requeued, 0);
        assert!(!queue.path().exists());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_file_format_is_newline_terminated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        queue.append("a");
        queue.append("b");

        assert_eq!(fs::read_to_string(queue.path()).unwrap(), "a\nb\n");
    }

    /// Records deliveries and never returns once `stall_after` were accepted
    struct StallingSink {
        delivered: Vec<String>,
        stall_after: usize,
    }

    #[async_trait]
    impl PayloadSink for StallingSink {
        async fn deliver(&mut self, payload: &str) -> Result<()> {
            if self.delivered.len() >= self.stall_after {
                std::future::pending::<()>().await;
            }
            self.delivered.push(payload.to_string());
            Ok(())
        }
    }

    /// Fails the test if the backlog file is gone while lines are delivered
    struct FileCheckingSink {
        path: PathBuf,
        delivered: usize,
    }

    #[async_trait]
    impl PayloadSink for FileCheckingSink {
        async fn deliver(&mut self, _payload: &str) -> Result<()> {
            assert!(self.path.exists(), "backlog removed before the scan finished");
            self.delivered += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_backlog_file_kept_until_scan_completes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        for i in 0..5 {
            queue.append(&format!("entry-{}", i));
        }

        let mut sink = FileCheckingSink {
            path: queue.path().to_path_buf(),
            delivered: 0,
        };
        let report = queue.drain_all(&mut sink).await;

        assert_eq!(sink.delivered, 5);
        assert_eq!(report.delivered, 5);
        assert!(!queue.path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_drain_redelivers() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        for i in 0..5 {
            queue.append(&format!("entry-{}", i));
        }

        let mut stalled = StallingSink {
            delivered: Vec::new(),
            stall_after: 3,
        };
        let interrupted = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            queue.drain_all(&mut stalled),
        )
        .await;

        assert!(interrupted.is_err(), "drain should have been cut off");
        assert_eq!(stalled.delivered, vec!["entry-0", "entry-1", "entry-2"]);
        assert_eq!(queue.len(), 5);

        let mut sink = RecordingSink::new();
        let report = queue.drain_all(&mut sink).await;

        assert_eq!(
            sink.delivered,
            vec!["entry-0", "entry-1", "entry-2", "entry-3", "entry-4"]
        );
        assert_eq!(report.delivered, 5);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_requeues_remaining_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        for i in 0..6 {
            queue.append(&format!("entry-{}", i));
        }

        let mut sink = RecordingSink::failing_after(2);
        let report = queue.drain_all(&mut sink).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.requeued, 4);
        // The sink is not retried for every line after the first failure
        assert_eq!(sink.attempts, 3);
        assert_eq!(
            fs::read_to_string(queue.path()).unwrap(),
            "entry-2\nentry-3\nentry-4\nentry-5\n"
        );
        assert!(!queue.requeue_path().exists());

        let mut sink = RecordingSink::new();
        queue.drain_all(&mut sink).await;
        assert_eq!(sink.delivered, vec!["entry-2", "entry-3", "entry-4", "entry-5"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_append_after_requeue_keeps_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        queue.append("old-0");
        queue.append("old-1");

        let mut sink = RecordingSink::failing_after(0);
        queue.drain_all(&mut sink).await;
        queue.append("new-0");

        let mut sink = RecordingSink::new();
        queue.drain_all(&mut sink).await;
        assert_eq!(sink.delivered, vec!["old-0", "old-1", "new-0"]);
    }

    #[tokio::test]
    async fn test_long_line_is_truncated_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let long = "x".repeat(MAX_LINE_BYTES + 100);
        queue.append("before");
        queue.append(&long);
        queue.append("after");

        let mut sink = RecordingSink::new();
        let report = queue.drain_all(&mut sink).await;

        assert_eq!(report.truncated, 1);
        assert_eq!(sink.delivered.len(), 3);
        assert_eq!(sink.delivered[0], "before");
        assert_eq!(sink.delivered[1], "x".repeat(MAX_LINE_BYTES));
        assert_eq!(sink.delivered[2], "after");
    }

    #[tokio::test]
    async fn test_blank_and_crlf_lines() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        fs::write(queue.path(), "one\r\n\n\ntwo\nthree").unwrap();

        assert_eq!(queue.len(), 3);

        let mut sink = RecordingSink::new();
        queue.drain_all(&mut sink).await;
        assert_eq!(sink.delivered, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_append_to_missing_directory_fails_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::new(dir.path().join("gone").join("data.txt"));

        assert!(!queue.append("lost"));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_read_bounded_line_exact_bound() {
        let data = b"abcd\nefgh";
        let mut reader = BufReader::with_capacity(2, &data[..]);
        let mut line = Vec::new();

        assert_eq!(read_bounded_line(&mut reader, &mut line, 4).unwrap(), Some(false));
        assert_eq!(line, b"abcd");
        assert_eq!(read_bounded_line(&mut reader, &mut line, 3).unwrap(), Some(true));
        assert_eq!(line, b"efg");
        assert_eq!(read_bounded_line(&mut reader, &mut line, 4).unwrap(), None);
    }

    #[test]
    fn test_requeue_path() {
        let queue = DurableQueue::new("/media/sd/data.txt");
        assert_eq!(queue.requeue_path(), PathBuf::from("/media/sd/data.txt.retry"));
    }
}
