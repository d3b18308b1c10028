use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{SendTimeoutError, Sender};

use crate::types::FrameBatch;

const SEND_POLL: Duration = Duration::from_millis(50);

/// Capture thread feeding recorded frame batches into the tracker.
#[derive(Debug)]
pub struct ReplayStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReplayStream {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Parses one JSON line. Blank lines and `#` comments yield `None`.
pub fn parse_batch(line: &str) -> Result<Option<FrameBatch>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let batch = serde_json::from_str(trimmed).context("invalid frame batch")?;
    Ok(Some(batch))
}

fn open_recording(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open recording {}", path.display()))?;
    Ok(BufReader::new(file))
}

pub fn start_replay_stream(path: PathBuf, frame_tx: Sender<FrameBatch>) -> Result<ReplayStream> {
    // Fail fast before spawning the reader thread.
    let reader = open_recording(&path)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut sent = 0u64;
        for (line_no, line) in reader.lines().enumerate() {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::error!("failed to read {}: {err}", path.display());
                    break;
                }
            };

            let mut batch = match parse_batch(&line) {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("{}:{}: {err:#}", path.display(), line_no + 1);
                    continue;
                }
            };

            // Recorded frames must not be dropped, so wait for the tracker
            // instead of discarding like a live camera would.
            loop {
                match frame_tx.send_timeout(batch, SEND_POLL) {
                    Ok(()) => {
                        sent += 1;
                        break;
                    }
                    Err(SendTimeoutError::Timeout(returned)) => {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        batch = returned;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return,
                }
            }
        }
        log::info!("replay of {} finished after {sent} frames", path.display());
    });

    Ok(ReplayStream {
        stop,
        handle: Some(handle),
    })
}
