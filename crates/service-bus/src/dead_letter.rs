//! # Dead Letter Sink
//!
//! Append-only JSON-lines log of envelopes that could not be routed.
//!
//! ```text
//!  dead_letter(env) ──→ [ unbounded queue ] ──→ writer task ──→ deadLetter.json
//!  dead_letter(env) ──┘                          │ (fs2 lock)     deadLetter.json.1
//!                                                └─ rotate ─────→ deadLetter.json.2 ...
//! ```
//!
//! Senders never block and never see I/O errors; the writer logs them.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use shared_types::Envelope;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DeadLetterConfig;

enum SinkCommand {
    Append(Envelope),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle to the dead-letter writer.
pub struct DeadLetterSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<SinkCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeadLetterSink {
    /// Create the directory and file if absent and start the writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(path: PathBuf, config: &DeadLetterConfig) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer {
            path: path.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
        };
        let worker = tokio::spawn(writer.run(rx));
        info!("[DeadLetter] Writing to {}", path.display());

        Ok(Self {
            path,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an envelope for persistence.
    pub fn enqueue(&self, envelope: Envelope) {
        if self.tx.send(SinkCommand::Append(envelope)).is_err() {
            warn!("[DeadLetter] Sink closed, envelope dropped");
        }
    }

    /// Wait until everything queued so far has been written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SinkCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drain the queue and stop the writer.
    pub async fn close(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SinkCommand::Close(done)).is_ok() {
            let _ = wait.await;
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

struct Writer {
    path: PathBuf,
    max_file_size: u64,
    max_files: usize,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SinkCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SinkCommand::Append(envelope) => self.append(envelope).await,
                SinkCommand::Flush(done) => {
                    let _ = done.send(());
                }
                SinkCommand::Close(done) => {
                    rx.close();
                    // Appends queued before the close are still written.
                    while let Some(rest) = rx.recv().await {
                        match rest {
                            SinkCommand::Append(envelope) => self.append(envelope).await,
                            SinkCommand::Flush(other) | SinkCommand::Close(other) => {
                                let _ = other.send(());
                            }
                        }
                    }
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("[DeadLetter] Writer stopped");
    }

    async fn append(&self, envelope: Envelope) {
        let line = match envelope.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "[DeadLetter] Cannot encode envelope");
                return;
            }
        };
        let path = self.path.clone();
        let (max_file_size, max_files) = (self.max_file_size, self.max_files);
        let result =
            tokio::task::spawn_blocking(move || append_line(&path, &line, max_file_size, max_files))
                .await;

        match result {
            Ok(Ok(())) => debug!(id = %envelope.id, "[DeadLetter] Envelope persisted"),
            Ok(Err(e)) => warn!(id = %envelope.id, error = %e, "[DeadLetter] Write failed"),
            Err(e) => warn!(id = %envelope.id, error = %e, "[DeadLetter] Writer task failed"),
        }
    }
}

/// Append one record, rotating first if it would push the file past
/// `max_file_size`.
fn append_line(path: &Path, line: &str, max_file_size: u64, max_files: usize) -> io::Result<()> {
    let record_len = line.len() as u64 + 1;
    let current = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if current > 0 && current + record_len > max_file_size {
        rotate(path, max_files)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let result = writeln!(file, "{}", line).and_then(|()| file.flush());
    let _ = FileExt::unlock(&file);
    result
}

/// Shift `<file>.i` to `<file>.i+1`, dropping anything past `max_files`,
/// then move the active file to `<file>.1`.
fn rotate(path: &Path, max_files: usize) -> io::Result<()> {
    if max_files == 0 {
        return fs::remove_file(path);
    }
    let oldest = rotated_path(path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(path, i + 1))?;
        }
    }
    fs::rename(path, rotated_path(path, 1))?;
    debug!("[DeadLetter] Rotated {}", path.display());
    Ok(())
}

/// `<file>.<index>`
pub fn rotated_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}
