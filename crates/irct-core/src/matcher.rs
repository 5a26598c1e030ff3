//! Expectation matcher
//!
//! `await_match` is the only call in the harness that waits on the network.
//! It suspends cooperatively (watch notification + deadline), so any number
//! of scenarios can wait at once on one runtime.

use crate::error::{HarnessError, Result};
use crate::handle::{ConnectionHandle, InboundLine};
use crate::journal::NoteKind;
use crate::transport::TransportError;
use crate::types::Cursor;
use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;

/// Default wait bound for a single expectation
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One wait: what to look for, for how long, and from where
#[derive(Debug, Clone)]
pub struct Expectation {
    /// Human-readable description used in errors and the journal
    pub description: String,
    /// Line pattern
    pub pattern: Regex,
    /// Wait bound
    pub timeout: Duration,
    /// Explicit start position; `None` means the handle's own cursor
    pub start: Option<Cursor>,
}

impl Expectation {
    /// Build an expectation from a pattern source
    ///
    /// # Errors
    /// `HarnessError::InvalidPattern` if the pattern does not compile.
    pub fn new(description: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self::with_regex(description, Regex::new(pattern)?))
    }

    /// Build an expectation from a compiled pattern
    #[must_use]
    pub fn with_regex(description: impl Into<String>, pattern: Regex) -> Self {
        Self {
            description: description.into(),
            pattern,
            timeout: DEFAULT_EXPECT_TIMEOUT,
            start: None,
        }
    }

    /// With wait bound
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scan from an explicit cursor without moving the handle's cursor
    #[inline]
    #[must_use]
    pub fn from_cursor(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }
}

/// A line that satisfied an expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedLine {
    /// The matched line
    pub line: InboundLine,
    /// Time spent waiting
    pub waited: Duration,
}

impl MatchedLine {
    /// Line text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.line.text
    }

    /// Cursor just past the matched line
    #[inline]
    #[must_use]
    pub fn next_cursor(&self) -> Cursor {
        Cursor(self.line.index + 1)
    }
}

/// Wait until `handle` has a line matching `expectation`
///
/// Scans from `expectation.start` when set (and then leaves the handle's
/// cursor alone), otherwise from the handle's cursor, which is advanced past
/// the matched line on success.
///
/// # Errors
/// - `HarnessError::ExpectationTimeout` when the bound elapses
/// - `HarnessError::Transport` when the connection closed and no line left
///   in the log matches
pub async fn await_match(
    handle: &mut ConnectionHandle,
    expectation: &Expectation,
) -> Result<MatchedLine> {
    let started = Instant::now();
    let deadline = started + expectation.timeout;
    let origin = expectation.start.unwrap_or_else(|| handle.cursor());

    let mut changes = handle.inbound().subscribe();
    let mut scan_from = origin;

    loop {
        // Subscribed before scanning: a line landing after this scan bumps
        // the version and wakes the wait below.
        changes.borrow_and_update();
        let closed = handle.inbound().is_closed();
        let scanned_to = Cursor(handle.inbound().len());

        if let Some(line) = handle.inbound().find_from(scan_from, &expectation.pattern) {
            let matched = MatchedLine {
                line,
                waited: started.elapsed(),
            };
            if expectation.start.is_none() {
                handle.advance_to(matched.next_cursor());
            }
            handle.journal().note(
                NoteKind::Match,
                Some(handle.id()),
                format!("{}: {}", expectation.description, matched.text()),
            );
            tracing::debug!(
                handle = %handle.id(),
                description = %expectation.description,
                line = %matched.text(),
                waited_ms = u64::try_from(matched.waited.as_millis()).unwrap_or(u64::MAX),
                "expectation met"
            );
            return Ok(matched);
        }

        if closed {
            return Err(HarnessError::transport(handle.id(), TransportError::Closed));
        }
        scan_from = scanned_to;

        match tokio::time::timeout_at(deadline, changes.changed()).await {
            Ok(Ok(())) => {}
            // Sender lives as long as the log; treat its loss as closure
            Ok(Err(_)) => {
                return Err(HarnessError::transport(handle.id(), TransportError::Closed));
            }
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::warn!(
                    handle = %handle.id(),
                    description = %expectation.description,
                    pattern = %expectation.pattern,
                    "expectation timed out"
                );
                return Err(HarnessError::ExpectationTimeout {
                    handle: handle.id().clone(),
                    description: expectation.description.clone(),
                    pattern: expectation.pattern.as_str().to_string(),
                    elapsed,
                });
            }
        }
    }
}

/// Wait for the first of several patterns
///
/// Returns the index of the pattern that matched together with the line.
/// All patterns are scanned line by line, so the earliest matching line wins.
///
/// # Errors
/// Same as `await_match`; the timeout error names the combined pattern.
pub async fn await_any(
    handle: &mut ConnectionHandle,
    description: &str,
    patterns: &[Regex],
    timeout: Duration,
) -> Result<(usize, MatchedLine)> {
    let combined = patterns
        .iter()
        .map(|p| format!("(?:{})", p.as_str()))
        .collect::<Vec<_>>()
        .join("|");
    let expectation = Expectation::new(description, &combined)?.timeout(timeout);
    let matched = await_match(handle, &expectation).await?;
    let index = patterns
        .iter()
        .position(|p| p.is_match(matched.text()))
        .unwrap_or(0);
    Ok((index, matched))
}
