//! Structured event journal
//!
//! One journal per topology. Every line sent or received, plus harness
//! notes (link confirmations, sync checks, tag checks), is appended with a
//! sequence number and wall-clock timestamp. The runner attaches a snapshot
//! to each `ScenarioResult`.

use crate::types::HandleId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Line written by the harness
    Outbound,
    /// Line received from a server
    Inbound,
    /// Harness annotation
    Note(NoteKind),
}

/// Category of a harness note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Link state change
    Link,
    /// Propagation check across servers
    Sync,
    /// Message-tag observation
    Tag,
    /// Action involving several clients
    MultiClient,
    /// Edge-case expected/actual comparison
    EdgeCase,
    /// Capability negotiation result
    Capability,
    /// Expectation matched
    Match,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str(">>"),
            Direction::Inbound => f.write_str("<<"),
            Direction::Note(kind) => write!(f, "[{}]", kind.tag()),
        }
    }
}

impl NoteKind {
    /// Short upper-case tag used in rendered transcripts
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            NoteKind::Link => "LINK",
            NoteKind::Sync => "SYNC",
            NoteKind::Tag => "TAG",
            NoteKind::MultiClient => "MULTI",
            NoteKind::EdgeCase => "EDGE",
            NoteKind::Capability => "CAP",
            NoteKind::Match => "MATCH",
        }
    }
}

/// One journal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Position in the journal
    pub seq: u64,
    /// Wall-clock time of the record
    pub at: DateTime<Utc>,
    /// Handle the record belongs to (absent for topology-wide notes)
    pub handle: Option<HandleId>,
    /// Direction or note kind
    pub direction: Direction,
    /// Line text or note body
    pub text: String,
}

impl fmt::Display for JournalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = self
            .handle
            .as_ref()
            .map_or_else(|| "*".to_string(), ToString::to_string);
        write!(
            f,
            "{} {:>5} {} {} {}",
            self.at.format("%H:%M:%S%.3f"),
            self.seq,
            who,
            self.direction,
            self.text
        )
    }
}

/// Append-only journal shared by a topology's handles
#[derive(Debug, Default)]
pub struct EventJournal {
    inner: Mutex<Vec<JournalEvent>>,
}

impl EventJournal {
    /// Create an empty journal
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its sequence number
    pub fn append(
        &self,
        handle: Option<&HandleId>,
        direction: Direction,
        text: impl Into<String>,
    ) -> u64 {
        let mut guard = self.inner.lock();
        let seq = u64::try_from(guard.len()).unwrap_or(u64::MAX);
        guard.push(JournalEvent {
            seq,
            at: Utc::now(),
            handle: handle.cloned(),
            direction,
            text: text.into(),
        });
        seq
    }

    /// Record a line written on `handle`
    #[inline]
    pub fn outbound(&self, handle: &HandleId, line: &str) -> u64 {
        self.append(Some(handle), Direction::Outbound, line)
    }

    /// Record a line received on `handle`
    #[inline]
    pub fn inbound(&self, handle: &HandleId, line: &str) -> u64 {
        self.append(Some(handle), Direction::Inbound, line)
    }

    /// Record a harness note
    #[inline]
    pub fn note(&self, kind: NoteKind, handle: Option<&HandleId>, text: impl Into<String>) -> u64 {
        self.append(handle, Direction::Note(kind), text)
    }

    /// Snapshot of every record
    #[must_use]
    pub fn events(&self) -> Vec<JournalEvent> {
        self.inner.lock().clone()
    }

    /// Records belonging to one handle
    #[must_use]
    pub fn for_handle(&self, handle: &HandleId) -> Vec<JournalEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.handle.as_ref() == Some(handle))
            .cloned()
            .collect()
    }

    /// Records with a given direction
    #[must_use]
    pub fn by_direction(&self, direction: Direction) -> Vec<JournalEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.direction == direction)
            .cloned()
            .collect()
    }

    /// Records appended at or after `seq`
    #[must_use]
    pub fn since(&self, seq: u64) -> Vec<JournalEvent> {
        let guard = self.inner.lock();
        let start = usize::try_from(seq).unwrap_or(usize::MAX).min(guard.len());
        guard[start..].to_vec()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Render the last `limit` records, one per line
#[must_use]
pub fn render_tail(events: &[JournalEvent], limit: usize) -> String {
    let start = events.len().saturating_sub(limit);
    let mut out = String::new();
    for event in &events[start..] {
        out.push_str(&event.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerLabel;

    fn handle() -> HandleId {
        HandleId::new(ServerLabel::new("irc1.test.net").unwrap(), "c1a")
    }

    #[test]
    fn journal_sequences_are_dense() {
        let journal = EventJournal::new();
        assert_eq!(journal.outbound(&handle(), "WORLD join"), 0);
        assert_eq!(journal.inbound(&handle(), ":irc1 2200 c1a :joined"), 1);
        assert_eq!(journal.note(NoteKind::Sync, None, "checked"), 2);
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.since(1).len(), 2);
        assert!(journal.since(99).is_empty());
    }

    #[test]
    fn journal_filters() {
        let journal = EventJournal::new();
        let other = HandleId::new(ServerLabel::new("irc2.test.net").unwrap(), "c2a");
        journal.outbound(&handle(), "A");
        journal.inbound(&other, "B");
        journal.note(NoteKind::Tag, Some(&other), "world/location=1,2");

        assert_eq!(journal.for_handle(&other).len(), 2);
        assert_eq!(journal.by_direction(Direction::Outbound).len(), 1);
        assert_eq!(journal.by_direction(Direction::Note(NoteKind::Tag)).len(), 1);
    }

    #[test]
    fn render_tail_keeps_last_lines() {
        let journal = EventJournal::new();
        for i in 0..5 {
            journal.inbound(&handle(), &format!("line {i}"));
        }
        let text = render_tail(&journal.events(), 2);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("line 4"));
        assert!(text.contains("c1a@irc1.test.net << line 3"));
    }
}
