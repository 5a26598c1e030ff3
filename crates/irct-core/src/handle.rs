//! Connection handles
//!
//! A `ConnectionHandle` is one registered client session. It owns:
//! - the write half of the connection (shared with its reader task for PONG)
//! - an append-only inbound log filled by a background reader task
//! - an append-only outbound log filled by the command driver
//! - a read cursor used by the expectation matcher

use crate::journal::EventJournal;
use crate::transport::{Connection, LineReader, LineWriter, TransportError};
use crate::types::{Cursor, HandleId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Shared write half
pub(crate) type SharedWriter = Arc<AsyncMutex<Box<dyn LineWriter>>>;

/// One received line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundLine {
    /// Position in the inbound log
    pub index: usize,
    /// Receive time
    pub received_at: DateTime<Utc>,
    /// Raw line without CRLF
    pub text: String,
}

/// One sent command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRecord {
    /// Send time
    pub sent_at: DateTime<Utc>,
    /// Raw command line
    pub text: String,
}

/// Inbound line log with change notification
///
/// Waiters subscribe to `version` before scanning so that a line pushed
/// between the scan and the wait is never missed.
#[derive(Debug)]
pub struct InboundLog {
    lines: Mutex<Vec<InboundLine>>,
    closed: AtomicBool,
    version: watch::Sender<u64>,
}

impl InboundLog {
    /// Create an empty, open log
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            lines: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            version,
        }
    }

    /// Append a line and wake waiters
    pub fn push(&self, text: impl Into<String>) -> usize {
        let index = {
            let mut guard = self.lines.lock();
            let index = guard.len();
            guard.push(InboundLine {
                index,
                received_at: Utc::now(),
                text: text.into(),
            });
            index
        };
        self.version.send_modify(|v| *v += 1);
        index
    }

    /// Mark the stream as finished and wake waiters
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.version.send_modify(|v| *v += 1);
    }

    /// Whether the reader saw end of stream
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of lines received so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether no line has been received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Change notifications
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// First line at or after `from` matching `pattern`
    #[must_use]
    pub fn find_from(&self, from: Cursor, pattern: &Regex) -> Option<InboundLine> {
        let guard = self.lines.lock();
        guard
            .iter()
            .skip(from.index())
            .find(|line| pattern.is_match(&line.text))
            .cloned()
    }

    /// Snapshot of all lines
    #[must_use]
    pub fn lines(&self) -> Vec<InboundLine> {
        self.lines.lock().clone()
    }

    /// Snapshot of lines at or after `from`
    #[must_use]
    pub fn lines_from(&self, from: Cursor) -> Vec<InboundLine> {
        let guard = self.lines.lock();
        guard.iter().skip(from.index()).cloned().collect()
    }
}

impl Default for InboundLog {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session attached to one server
#[derive(Debug)]
pub struct ConnectionHandle {
    id: HandleId,
    writer: SharedWriter,
    inbound: Arc<InboundLog>,
    outbound: Vec<OutboundRecord>,
    cursor: Cursor,
    journal: Arc<EventJournal>,
    reader_task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Attach a handle to an opened connection and start its reader task
    #[must_use]
    pub fn attach(id: HandleId, connection: Connection, journal: Arc<EventJournal>) -> Self {
        let Connection { writer, reader } = connection;
        let writer: SharedWriter = Arc::new(AsyncMutex::new(writer));
        let inbound = Arc::new(InboundLog::new());

        let reader_task = tokio::spawn(pump_inbound(
            id.clone(),
            reader,
            Arc::clone(&writer),
            Arc::clone(&inbound),
            Arc::clone(&journal),
        ));

        Self {
            id,
            writer,
            inbound,
            outbound: Vec::new(),
            cursor: Cursor::START,
            journal,
            reader_task: Some(reader_task),
        }
    }

    /// Handle identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> &HandleId {
        &self.id
    }

    /// Client nick
    #[inline]
    #[must_use]
    pub fn nick(&self) -> &str {
        &self.id.nick
    }

    /// Inbound log
    #[inline]
    #[must_use]
    pub fn inbound(&self) -> &InboundLog {
        &self.inbound
    }

    /// Commands sent so far, oldest first
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> &[OutboundRecord] {
        &self.outbound
    }

    /// Journal shared with the rest of the topology
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Arc<EventJournal> {
        &self.journal
    }

    /// Current read cursor
    #[inline]
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Move the cursor forward; never moves it backwards
    pub fn advance_to(&mut self, cursor: Cursor) {
        if cursor > self.cursor {
            self.cursor = cursor;
        }
    }

    /// Mark every line received so far as consumed
    pub fn skip_pending(&mut self) -> Cursor {
        self.advance_to(Cursor(self.inbound.len()));
        self.cursor
    }

    /// Whether the connection is still delivering lines
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inbound.is_closed()
    }

    pub(crate) async fn write_raw(&mut self, line: &str) -> Result<(), TransportError> {
        self.outbound.push(OutboundRecord {
            sent_at: Utc::now(),
            text: line.to_string(),
        });
        self.writer.lock().await.write_line(line).await
    }

    /// Stop the reader task and close the write half
    ///
    /// Lines that arrived but were never matched are discarded with the
    /// handle.
    pub async fn teardown(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::debug!(handle = %self.id, error = %e, "shutdown after close");
        }
        self.inbound.close();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Reader task: append every line to the inbound log, answer PING
async fn pump_inbound(
    id: HandleId,
    mut reader: Box<dyn LineReader>,
    writer: SharedWriter,
    inbound: Arc<InboundLog>,
    journal: Arc<EventJournal>,
) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                journal.inbound(&id, &line);
                if let Some(token) = line.strip_prefix("PING ") {
                    let pong = format!("PONG {token}");
                    match writer.lock().await.write_line(&pong).await {
                        Ok(()) => {
                            journal.outbound(&id, &pong);
                        }
                        Err(e) => tracing::warn!(handle = %id, error = %e, "PONG failed"),
                    }
                }
                tracing::trace!(handle = %id, %line, "inbound");
                inbound.push(line);
            }
            Ok(None) => {
                tracing::debug!(handle = %id, "connection closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(handle = %id, error = %e, "read failed");
                break;
            }
        }
    }
    inbound.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_handle;

    #[test]
    fn inbound_log_find_from_respects_cursor() {
        let log = InboundLog::new();
        log.push("WORLD JOIN a");
        log.push("MODE a +y");
        log.push("WORLD JOIN b");
        let re = Regex::new("WORLD.*JOIN").unwrap();

        assert_eq!(log.find_from(Cursor(0), &re).unwrap().index, 0);
        assert_eq!(log.find_from(Cursor(1), &re).unwrap().index, 2);
        assert!(log.find_from(Cursor(3), &re).is_none());
    }

    #[tokio::test]
    async fn inbound_log_notifies_subscribers() {
        let log = Arc::new(InboundLog::new());
        let mut rx = log.subscribe();
        let writer = Arc::clone(&log);
        tokio::spawn(async move {
            writer.push("hello");
        });
        rx.changed().await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn inbound_log_close_is_sticky() {
        let log = InboundLog::new();
        assert!(!log.is_closed());
        log.close();
        assert!(log.is_closed());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn handle_answers_ping_and_skips_pending() {
        let (mut handle, tx, written) = scripted_handle("irc1.test.net", "c1a");
        let journal = Arc::clone(handle.journal());

        let mut changes = handle.inbound().subscribe();
        tx.send("PING :irc1.test.net".to_string()).unwrap();
        while handle.inbound().is_empty() {
            changes.changed().await.unwrap();
        }

        assert_eq!(written.lock().as_slice(), ["PONG :irc1.test.net".to_string()]);
        assert_eq!(handle.skip_pending(), Cursor(1));

        drop(tx);
        while handle.is_open() {
            changes.changed().await.unwrap();
        }
        handle.teardown().await;
        assert!(!handle.is_open());
        assert!(journal.len() >= 2);
    }
}
