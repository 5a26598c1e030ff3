//! Scenario results and suite reports

use crate::journal::{render_tail, JournalEvent};
use crate::types::{HandleId, ScenarioId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Journal lines shown under a failed scenario in text reports
const TRANSCRIPT_TAIL: usize = 20;

/// Terminal verdict of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Body completed
    Passed,
    /// Setup or body raised an error
    Failed,
    /// A server rejected a precondition
    Skipped,
}

impl ScenarioStatus {
    fn marker(self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "PASS",
            ScenarioStatus::Failed => "FAIL",
            ScenarioStatus::Skipped => "SKIP",
        }
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Outcome of one scenario invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Invocation id
    pub id: ScenarioId,
    /// Scenario name
    pub name: String,
    /// Verdict
    pub status: ScenarioStatus,
    /// Failure or skip reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Handles implicated by a failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_handles: Vec<HandleId>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Time from start to verdict, teardown excluded
    pub elapsed_ms: u64,
    /// Full journal of the scenario's topology
    pub transcript: Vec<JournalEvent>,
}

impl ScenarioResult {
    /// Elapsed time as a `Duration`
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Whether the scenario failed
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == ScenarioStatus::Failed
    }
}

/// Results of a suite run, in submission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
    /// One result per scenario
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    /// Number of scenarios with `status`
    #[must_use]
    pub fn count(&self, status: ScenarioStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Failed results
    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    /// Check if no scenario failed (skips do not count against the suite)
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Render as JSON
    ///
    /// # Errors
    /// Propagates `serde_json` serialization errors.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        use std::fmt::Write as _;

        let mut report = String::new();
        let wall = (self.finished_at - self.started_at).num_milliseconds();

        report.push_str("=== IRCT Suite Report ===\n\n");
        let _ = writeln!(report, "Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(report, "Duration: {wall} ms");
        let _ = writeln!(report, "Scenarios: {}", self.results.len());
        let _ = writeln!(report, "Passed: {}", self.count(ScenarioStatus::Passed));
        let _ = writeln!(report, "Failed: {}", self.count(ScenarioStatus::Failed));
        let _ = writeln!(report, "Skipped: {}", self.count(ScenarioStatus::Skipped));

        if !self.results.is_empty() {
            report.push_str("\n=== Scenarios ===\n");
        }
        for result in &self.results {
            let _ = write!(report, "[{}] {} ({} ms)", result.status, result.name, result.elapsed_ms);
            if let Some(reason) = &result.reason {
                let _ = write!(report, ": {reason}");
            }
            report.push('\n');

            if result.is_failure() && !result.transcript.is_empty() {
                for line in render_tail(&result.transcript, TRANSCRIPT_TAIL).lines() {
                    let _ = writeln!(report, "    {line}");
                }
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASSED" } else { "FAILED" }
        );
        report
    }
}
