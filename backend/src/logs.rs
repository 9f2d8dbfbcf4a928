//! In-memory tail of the service log, fed by the tracing subscriber and
//! served on `/api/logs`.

use std::collections::VecDeque;
use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing_subscriber::fmt::MakeWriter;

const MIN_LINES: usize = 100;
const MAX_LINES: usize = 200_000;
pub const MAX_SNAPSHOT: usize = 2000;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogLine {
    pub id: u64,
    pub line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSnapshot {
    pub cursor: u64,
    pub next_cursor: u64,
    /// Lines between the requested cursor and the oldest retained line were dropped.
    pub truncated: bool,
    pub lines: Vec<LogLine>,
}

#[derive(Default)]
struct Ring {
    next_id: u64,
    lines: VecDeque<LogLine>,
}

pub struct LogStore {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            capacity: capacity.clamp(MIN_LINES, MAX_LINES),
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        // A panic while holding the lock cannot leave the ring half-written.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_line(&self, line: String) {
        let mut ring = self.ring();
        ring.next_id = ring.next_id.saturating_add(1);
        let id = ring.next_id;
        ring.lines.push_back(LogLine { id, line });
        while ring.lines.len() > self.capacity {
            ring.lines.pop_front();
        }
    }

    /// Without a cursor: the newest `limit` lines. With one: up to `limit`
    /// lines written after it, oldest first.
    pub fn snapshot(&self, cursor: Option<u64>, limit: usize) -> LogSnapshot {
        let limit = limit.clamp(1, MAX_SNAPSHOT);
        let ring = self.ring();
        let latest = ring.next_id;

        let (truncated, lines): (bool, Vec<LogLine>) = match (cursor, ring.lines.front()) {
            (_, None) => (false, Vec::new()),
            (None, Some(_)) => {
                let skip = ring.lines.len().saturating_sub(limit);
                (false, ring.lines.iter().skip(skip).cloned().collect())
            }
            (Some(cur), Some(first)) => (
                cur < first.id.saturating_sub(1),
                ring.lines
                    .iter()
                    .filter(|l| l.id > cur)
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
        };

        let next_cursor = lines
            .last()
            .map(|l| l.id)
            .unwrap_or_else(|| cursor.unwrap_or(latest));
        LogSnapshot {
            cursor: latest,
            next_cursor,
            truncated,
            lines,
        }
    }
}

#[derive(Clone)]
pub struct TeeMakeWriter {
    store: Arc<LogStore>,
}

impl TeeMakeWriter {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }
}

pub struct TeeWriter {
    store: Arc<LogStore>,
    stdout: io::Stdout,
    pending: Vec<u8>,
}

impl TeeWriter {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.store
                .push_line(line.trim_end_matches(['\n', '\r']).to_string());
        }
    }
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            store: self.store.clone(),
            stdout: io::stdout(),
            pending: Vec::new(),
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.stdout.write(buf)?;
        self.pending.extend_from_slice(&buf[..written]);
        self.drain_lines();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}
