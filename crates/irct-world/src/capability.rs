//! Capability negotiation across every client of a topology

use crate::patterns::capability_reply;
use irct_core::{
    await_match, send_command, Expectation, NoteKind, Result, ScenarioOutcome, ServerLabel,
    Topology,
};
use regex::Regex;
use std::time::Duration;

/// Aggregate capability verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    /// Every server acknowledged
    Acked,
    /// At least one server refused
    Rejected {
        /// Servers that sent NAK, in topology order
        servers: Vec<ServerLabel>,
    },
}

impl CapabilityStatus {
    /// Whether every server acknowledged
    #[inline]
    #[must_use]
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked)
    }

    /// Skip outcome for a rejection, `None` when acknowledged
    #[must_use]
    pub fn skip_outcome(&self, capability: &str) -> Option<ScenarioOutcome> {
        match self {
            Self::Acked => None,
            Self::Rejected { servers } => {
                let names: Vec<_> = servers.iter().map(ServerLabel::as_str).collect();
                Some(ScenarioOutcome::Skipped(format!(
                    "world module not loaded on {} ({capability} NAK'd)",
                    names.join(", ")
                )))
            }
        }
    }
}

/// Request `capability` on every handle and collect the verdicts
///
/// Each handle's cursor is moved to the end of its log afterwards.
///
/// # Errors
/// - `HarnessError::ExpectationTimeout` if a server answers neither ACK nor NAK
/// - `HarnessError::Transport` if a request cannot be sent
pub async fn negotiate_capability(
    topology: &mut Topology,
    capability: &str,
    timeout: Duration,
) -> Result<CapabilityStatus> {
    let reply = Regex::new(&capability_reply(capability))?;
    let mut rejected: Vec<ServerLabel> = Vec::new();

    for handle in topology.handles_mut() {
        let server = handle.id().server.clone();
        send_command(handle, &format!("CAP REQ :{capability}")).await?;
        let description = format!("{server} capability response");
        let expectation = Expectation::with_regex(description, reply.clone()).timeout(timeout);
        let matched = await_match(handle, &expectation).await?;
        let rejected_here = reply
            .captures(matched.text())
            .is_some_and(|c| &c[1] == "NAK");

        if rejected_here {
            tracing::warn!(%server, %capability, "SKIP: capability NAK'd");
            handle.journal().note(
                NoteKind::EdgeCase,
                Some(handle.id()),
                format!("{capability}: expected=ACK, actual=NAK"),
            );
            if !rejected.contains(&server) {
                rejected.push(server);
            }
        } else {
            handle.journal().note(
                NoteKind::Capability,
                Some(handle.id()),
                format!("{capability} acknowledged: {}", matched.text()),
            );
        }
        handle.skip_pending();
    }

    if rejected.is_empty() {
        Ok(CapabilityStatus::Acked)
    } else {
        Ok(CapabilityStatus::Rejected { servers: rejected })
    }
}
