use std::{
    collections::{BTreeMap, VecDeque},
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
    action::DetectedAction,
    types::{ActionCounts, ActionEvent, ActionKind},
};

const HEADER_RULE: usize = 50;
const TABLE_RULE: usize = 70;

/// Line-oriented persistence target for session logs.
pub trait HistorySink: Send {
    fn write_line(&mut self, file_name: &str, line: &str) -> io::Result<()>;
}

/// Appends session logs as text files under one directory.
pub struct FileSink {
    dir: PathBuf,
    current: Option<(String, BufWriter<File>)>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    fn writer_for(&mut self, file_name: &str) -> io::Result<&mut BufWriter<File>> {
        let reopen = !matches!(&self.current, Some((name, _)) if name.as_str() == file_name);
        if reopen {
            self.current = None;
            fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(file_name))?;
            self.current = Some((file_name.to_string(), BufWriter::new(file)));
        }

        match &mut self.current {
            Some((_, writer)) => Ok(writer),
            None => Err(io::Error::other("history file not open")),
        }
    }
}

impl HistorySink for FileSink {
    fn write_line(&mut self, file_name: &str, line: &str) -> io::Result<()> {
        let result = self.writer_for(file_name).and_then(|writer| {
            writeln!(writer, "{line}")?;
            writer.flush()
        });
        if result.is_err() {
            // Reopen on the next attempt.
            self.current = None;
        }
        result
    }
}

/// In-memory sink; clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    files: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn lines(&self, file_name: &str) -> Vec<String> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(file_name).cloned())
            .unwrap_or_default()
    }
}

impl HistorySink for MemorySink {
    fn write_line(&mut self, file_name: &str, line: &str) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?;
        files
            .entry(file_name.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }
}

/// One lock episode's action log.
#[derive(Clone, Debug, PartialEq)]
pub struct HistorySession {
    pub identity: String,
    pub file_name: String,
    pub started_at: f64,
    pub ended_at: Option<f64>,
    pub events: Vec<ActionEvent>,
    pub counts: ActionCounts,
}

impl HistorySession {
    fn new(identity: &str, started_at: f64) -> Self {
        Self {
            identity: identity.to_string(),
            file_name: history_file_name(identity, started_at),
            started_at,
            ended_at: None,
            events: Vec::new(),
            counts: ActionCounts::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[derive(Debug)]
struct PendingLine {
    file_name: String,
    line: String,
}

/// Writes session logs through a sink without ever failing the caller.
///
/// Lines go to an in-memory queue first and are flushed in order. A failing
/// sink leaves the remainder queued, sets a warning, and is retried on the
/// next call.
pub struct HistoryRecorder<S: HistorySink> {
    sink: S,
    session: Option<HistorySession>,
    pending: VecDeque<PendingLine>,
    max_pending: usize,
    dropped: u64,
    warning: Option<String>,
}

impl<S: HistorySink> HistoryRecorder<S> {
    pub fn new(sink: S, max_pending: usize) -> Self {
        Self {
            sink,
            session: None,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            dropped: 0,
            warning: None,
        }
    }

    pub fn session(&self) -> Option<&HistorySession> {
        self.session.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Starts a session and writes its header. A session still open is closed first.
    pub fn open(&mut self, identity: &str, started_at: f64) -> &HistorySession {
        if self.session.is_some() {
            log::warn!("opening a history session while another is open; closing it");
            self.close(started_at);
        }

        let session = HistorySession::new(identity, started_at);
        log::info!("started history file: {}", session.file_name);
        for line in header_lines(&session) {
            self.enqueue(&session.file_name, line);
        }
        self.flush_pending();
        self.session.insert(session)
    }

    /// Stamps the action with the next sequence number and appends it.
    /// Returns `None` when no session is open.
    pub fn record(&mut self, action: DetectedAction) -> Option<ActionEvent> {
        let session = self.session.as_mut()?;
        let event = ActionEvent {
            kind: action.kind,
            timestamp: action.timestamp,
            description: action.description,
            magnitude: action.magnitude,
            sequence: session.events.len() as u64 + 1,
        };
        session.counts.record(event.kind);
        session.events.push(event.clone());

        let file_name = session.file_name.clone();
        log::debug!("action #{}: {}", event.sequence, event.description);
        self.enqueue(&file_name, event_line(&event));
        self.flush_pending();
        Some(event)
    }

    /// Writes the footer and ends the session. Closing with no open session is a no-op.
    pub fn close(&mut self, ended_at: f64) -> Option<HistorySession> {
        let mut session = self.session.take()?;
        session.ended_at = Some(ended_at.max(session.started_at));

        for line in footer_lines(&session) {
            self.enqueue(&session.file_name, line);
        }
        self.flush_pending();
        log::info!(
            "closed history file {} with {} actions",
            session.file_name,
            session.counts.total()
        );
        Some(session)
    }

    /// Retries queued lines; returns how many remain.
    pub fn retry_pending(&mut self) -> usize {
        if !self.pending.is_empty() {
            self.flush_pending();
        }
        self.pending.len()
    }

    fn enqueue(&mut self, file_name: &str, line: String) {
        if self.pending.len() >= self.max_pending {
            if let Some(lost) = self.pending.pop_front() {
                self.dropped += 1;
                log::error!(
                    "history buffer full, dropping line for {}: {}",
                    lost.file_name,
                    lost.line
                );
            }
        }
        self.pending.push_back(PendingLine {
            file_name: file_name.to_string(),
            line,
        });
    }

    fn flush_pending(&mut self) {
        while let Some(entry) = self.pending.front() {
            if let Err(err) = self.sink.write_line(&entry.file_name, &entry.line) {
                let message = format!(
                    "history write to {} failed ({err}); {} line(s) buffered",
                    entry.file_name,
                    self.pending.len()
                );
                if self.warning.is_none() {
                    log::warn!("{message}");
                }
                self.warning = Some(message);
                return;
            }
            self.pending.pop_front();
        }

        if self.warning.take().is_some() {
            log::info!("history persistence recovered");
        }
    }
}

pub fn history_file_name(identity: &str, started_at: f64) -> String {
    let name: String = identity
        .chars()
        .flat_map(|c| {
            let keep = c.is_alphanumeric();
            c.to_lowercase().map(move |l| if keep { l } else { '_' })
        })
        .collect();
    format!(
        "{name}_history_{}.txt",
        to_utc(started_at).format("%Y%m%d%H%M%S")
    )
}

fn header_lines(session: &HistorySession) -> Vec<String> {
    vec![
        format!("Face Locking History for: {}", session.identity),
        format!(
            "Session started: {}",
            to_utc(session.started_at).format("%Y-%m-%d %H:%M:%S%.3f")
        ),
        "=".repeat(HEADER_RULE),
        "Seq\tTimestamp\tAction Type\tDescription\tValue".to_string(),
        "-".repeat(TABLE_RULE),
    ]
}

fn event_line(event: &ActionEvent) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{:.3}",
        event.sequence,
        to_utc(event.timestamp).format("%H:%M:%S%.3f"),
        event.kind.label(),
        event.description,
        event.magnitude
    )
}

fn footer_lines(session: &HistorySession) -> Vec<String> {
    let ended_at = session.ended_at.unwrap_or(session.started_at);
    let mut lines = vec![
        "-".repeat(TABLE_RULE),
        format!(
            "Session ended: {}",
            to_utc(ended_at).format("%Y-%m-%d %H:%M:%S%.3f")
        ),
        format!("Duration: {:.1}s", ended_at - session.started_at),
        format!("Total actions recorded: {}", session.counts.total()),
        "Action Summary:".to_string(),
    ];
    lines.extend(
        ActionKind::ALL
            .iter()
            .map(|kind| format!("  {}: {}", kind.label(), session.counts.get(*kind))),
    );
    lines
}

fn to_utc(timestamp: f64) -> DateTime<Utc> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).unwrap_or_default()
}
