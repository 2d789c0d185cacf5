mod record;

pub use record::LogRecord;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::TrackerConfig;
use crate::error::PersistError;

const MAIN_LOG_FILE: &str = "events.jsonl";
const STAGING_FILE: &str = "events.wal";
const RETRY_BASE_DELAY_MS: u64 = 50;

enum LogCommand {
    Append(LogRecord),
    Flush(mpsc::SyncSender<()>),
    Shutdown(mpsc::SyncSender<()>),
}

/// Durable append-only JSONL log.
///
/// Records buffer in memory and append to a write-ahead staging file
/// immediately; a flush (interval or record-count threshold, whichever
/// first) moves the buffer to the main log and truncates the staging file.
/// A crash between flushes therefore loses nothing that reached the staging
/// file, and startup replays whatever it left behind.
///
/// All file I/O runs on a dedicated worker thread fed over a channel, so
/// appends from the engine tick never block on disk.
#[derive(Clone)]
pub struct PersistenceLog {
    inner: Arc<LogInner>,
    recovered: u64,
    gap_reported: bool,
}

struct LogInner {
    sender: mpsc::Sender<LogCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failed: Arc<AtomicBool>,
    appended: AtomicU64,
}

impl Drop for LogInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            let (reply_tx, _reply_rx) = mpsc::sync_channel(1);
            let _ = self.sender.send(LogCommand::Shutdown(reply_tx));
            if handle.join().is_err() {
                error!("persistence worker panicked during shutdown");
            }
        }
    }
}

impl PersistenceLog {
    /// Open (or create) the log under `dir`, replaying any records a prior
    /// run staged but never flushed.
    pub fn open(dir: impl AsRef<Path>, config: &TrackerConfig) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| PersistError::OpenFailed {
            path: dir.display().to_string(),
            reason: err.to_string(),
        })?;

        let main_path = dir.join(MAIN_LOG_FILE);
        let staging_path = dir.join(STAGING_FILE);

        let (recovered, gap_reported) = recover_staged(&main_path, &staging_path)?;

        let failed = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let worker = LogWorker {
            main_path: main_path.clone(),
            staging_path,
            flush_interval: Duration::from_secs_f64(config.flush_interval_seconds),
            flush_threshold: config.flush_record_threshold,
            max_retries: config.persist_max_retries,
            failed: failed.clone(),
        };

        let handle = thread::Builder::new()
            .name("cogload-persist".into())
            .spawn(move || worker.run(receiver))
            .map_err(|err| PersistError::OpenFailed {
                path: main_path.display().to_string(),
                reason: format!("worker spawn failed: {err}"),
            })?;

        Ok(Self {
            inner: Arc::new(LogInner {
                sender,
                worker: Mutex::new(Some(handle)),
                failed,
                appended: AtomicU64::new(0),
            }),
            recovered,
            gap_reported,
        })
    }

    /// Queue one record. Fails only once persistence has given up for the
    /// rest of the run; capture and streaming are unaffected either way.
    pub fn append(&self, record: LogRecord) -> Result<(), PersistError> {
        if self.inner.failed.load(Ordering::Relaxed) {
            return Err(PersistError::RetryExhausted {
                attempts: 0,
                reason: "persistence disabled after exhausted retries".into(),
            });
        }
        self.inner
            .sender
            .send(LogCommand::Append(record))
            .map_err(|_| PersistError::WorkerGone)?;
        self.inner.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Force a flush and wait for it to complete.
    pub fn flush(&self) -> Result<(), PersistError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.inner
            .sender
            .send(LogCommand::Flush(reply_tx))
            .map_err(|_| PersistError::WorkerGone)?;
        reply_rx
            .recv_timeout(Duration::from_secs(30))
            .map_err(|_| PersistError::WorkerGone)
    }

    /// Flush and stop the worker. Idempotent; later calls are no-ops.
    pub fn shutdown(&self) {
        let mut guard = match self.inner.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            if self.inner.sender.send(LogCommand::Shutdown(reply_tx)).is_ok() {
                let _ = reply_rx.recv_timeout(Duration::from_secs(30));
            }
            if handle.join().is_err() {
                error!("persistence worker panicked during shutdown");
            }
        }
    }

    /// Records replayed from the staging file at open.
    pub fn recovered_count(&self) -> u64 {
        self.recovered
    }

    /// True when the staging file held unreadable data whose loss was
    /// reported as a gap rather than invented.
    pub fn gap_reported(&self) -> bool {
        self.gap_reported
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Records accepted since open (not counting recovery).
    pub fn appended_count(&self) -> u64 {
        self.inner.appended.load(Ordering::Relaxed)
    }
}

/// Replay staged records into the main log. Unreadable lines are reported
/// as a gap; the data is not reconstructed.
fn recover_staged(main_path: &Path, staging_path: &Path) -> Result<(u64, bool), PersistError> {
    if !staging_path.exists() {
        return Ok((0, false));
    }

    let contents = fs::read_to_string(staging_path).map_err(|err| PersistError::OpenFailed {
        path: staging_path.display().to_string(),
        reason: err.to_string(),
    })?;

    let mut recovered_lines = Vec::new();
    let mut gap_reported = false;

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(line) {
            Ok(_) => recovered_lines.push(line.to_string()),
            Err(err) => {
                // Most likely a torn write from the crash itself.
                warn!("unreadable staged record, reporting gap: {err}");
                gap_reported = true;
            }
        }
    }

    if !recovered_lines.is_empty() {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(main_path)
            .map_err(|err| PersistError::OpenFailed {
                path: main_path.display().to_string(),
                reason: err.to_string(),
            })?;
        let mut chunk = recovered_lines.join("\n");
        chunk.push('\n');
        file.write_all(chunk.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| PersistError::OpenFailed {
                path: main_path.display().to_string(),
                reason: err.to_string(),
            })?;
        info!(
            "recovered {} staged records into {}",
            recovered_lines.len(),
            main_path.display()
        );
    }

    fs::write(staging_path, "").map_err(|err| PersistError::OpenFailed {
        path: staging_path.display().to_string(),
        reason: err.to_string(),
    })?;

    Ok((recovered_lines.len() as u64, gap_reported))
}

struct LogWorker {
    main_path: PathBuf,
    staging_path: PathBuf,
    flush_interval: Duration,
    flush_threshold: usize,
    max_retries: usize,
    failed: Arc<AtomicBool>,
}

impl LogWorker {
    fn run(self, receiver: mpsc::Receiver<LogCommand>) {
        let mut buffer: Vec<String> = Vec::new();
        let mut staging = open_append(&self.staging_path);
        let mut next_flush = Instant::now() + self.flush_interval;

        loop {
            let timeout = next_flush.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(timeout) {
                Ok(LogCommand::Append(record)) => {
                    let line = match serde_json::to_string(&record) {
                        Ok(line) => line,
                        Err(err) => {
                            error!("record failed to serialize, dropping: {err}");
                            continue;
                        }
                    };

                    // The staging write is the durability backstop between
                    // flushes; a failure here only narrows the crash window.
                    if let Some(file) = staging.as_mut() {
                        if let Err(err) = writeln_now(file, &line) {
                            warn!("staging write failed: {err}");
                            staging = None;
                        }
                    }

                    buffer.push(line);
                    if buffer.len() >= self.flush_threshold {
                        if !self.flush(&mut buffer) {
                            break;
                        }
                        next_flush = Instant::now() + self.flush_interval;
                    }
                }
                Ok(LogCommand::Flush(reply)) => {
                    let ok = self.flush(&mut buffer);
                    let _ = reply.send(());
                    if !ok {
                        break;
                    }
                    next_flush = Instant::now() + self.flush_interval;
                }
                Ok(LogCommand::Shutdown(reply)) => {
                    self.flush(&mut buffer);
                    let _ = reply.send(());
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !buffer.is_empty() && !self.flush(&mut buffer) {
                        break;
                    }
                    next_flush = Instant::now() + self.flush_interval;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush(&mut buffer);
                    break;
                }
            }
        }
    }

    /// Write the buffer to the main log with bounded retries, then truncate
    /// the staging file. Returns false once retries are exhausted; staged
    /// lines stay on disk for the next run's recovery.
    fn flush(&self, buffer: &mut Vec<String>) -> bool {
        if buffer.is_empty() {
            return true;
        }

        let mut chunk = buffer.join("\n");
        chunk.push('\n');

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        for attempt in 1..=self.max_retries {
            match append_chunk(&self.main_path, &chunk) {
                Ok(()) => {
                    buffer.clear();
                    if let Err(err) = fs::write(&self.staging_path, "") {
                        warn!("failed to truncate staging file: {err}");
                    }
                    return true;
                }
                Err(err) => {
                    warn!(
                        "log flush attempt {attempt}/{} failed: {err}",
                        self.max_retries
                    );
                    if attempt < self.max_retries {
                        thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }

        error!(
            "persistence retries exhausted after {} attempts; {} records remain staged",
            self.max_retries,
            buffer.len()
        );
        self.failed.store(true, Ordering::Relaxed);
        false
    }
}

fn open_append(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!("failed to open staging file {}: {err}", path.display());
            None
        }
    }
}

fn writeln_now(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()
}

fn append_chunk(path: &Path, chunk: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(chunk.as_bytes())?;
    file.sync_data()
}
