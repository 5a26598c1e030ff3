//! Sync verifier
//!
//! "Act on one handle, expect on all others." The stimulus runs exactly
//! once; each peer is then awaited independently and every miss is
//! collected before failing, so a partial propagation shows up in full.

use crate::driver::send_command;
use crate::error::{HarnessError, PeerFailure, Result};
use crate::handle::ConnectionHandle;
use crate::journal::NoteKind;
use crate::matcher::{await_match, Expectation, DEFAULT_EXPECT_TIMEOUT};
use crate::topology::Topology;
use crate::types::HandleId;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::time::Duration;

/// Something done to the acting handle
#[async_trait]
pub trait Stimulus: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Apply the stimulus
    async fn apply(&self, actor: &mut ConnectionHandle) -> Result<()>;
}

/// Send one command
#[derive(Debug, Clone)]
pub struct Command(pub String);

impl Command {
    /// Create a command stimulus
    #[must_use]
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }
}

#[async_trait]
impl Stimulus for Command {
    fn describe(&self) -> String {
        self.0.clone()
    }

    async fn apply(&self, actor: &mut ConnectionHandle) -> Result<()> {
        send_command(actor, &self.0).await
    }
}

/// Send one command, then require acknowledgements on the acting handle
#[derive(Debug, Clone)]
pub struct AckedCommand {
    /// Command line
    pub command: String,
    /// Expectations the actor must satisfy, in order
    pub acks: Vec<Expectation>,
}

impl AckedCommand {
    /// Command without acknowledgements yet
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            acks: Vec::new(),
        }
    }

    /// Add an acknowledgement
    #[must_use]
    pub fn ack(mut self, expectation: Expectation) -> Self {
        self.acks.push(expectation);
        self
    }
}

#[async_trait]
impl Stimulus for AckedCommand {
    fn describe(&self) -> String {
        self.command.clone()
    }

    async fn apply(&self, actor: &mut ConnectionHandle) -> Result<()> {
        send_command(actor, &self.command).await?;
        for ack in &self.acks {
            await_match(actor, ack).await?;
        }
        Ok(())
    }
}

/// Patterns every peer must produce, in order
#[derive(Debug, Clone)]
pub struct SyncCheck {
    /// Description used in expectations and notes
    pub description: String,
    /// Patterns, matched sequentially per peer
    pub patterns: Vec<Regex>,
    /// Bound for each individual wait
    pub timeout: Duration,
}

impl SyncCheck {
    /// Build a check from pattern sources
    ///
    /// # Errors
    /// `HarnessError::InvalidPattern` if any pattern does not compile.
    pub fn new(description: impl Into<String>, patterns: &[&str]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            description: description.into(),
            patterns,
            timeout: DEFAULT_EXPECT_TIMEOUT,
        })
    }

    /// With per-wait bound
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Apply `stimulus` on `acting` and require `check` on every other handle
///
/// With fewer than two handles there is nothing to synchronize and the call
/// succeeds without doing anything.
///
/// # Errors
/// - `HarnessError::UnknownHandle` if `acting` is not in the topology
/// - any error raised by the stimulus itself
/// - `HarnessError::SyncVerificationFailed` listing every peer that missed
pub async fn verify_sync(
    topology: &mut Topology,
    acting: &HandleId,
    stimulus: &dyn Stimulus,
    check: &SyncCheck,
) -> Result<()> {
    let journal = std::sync::Arc::clone(topology.journal());
    if topology.handle_count() < 2 {
        topology.handle(acting)?;
        tracing::debug!(%acting, "single handle, nothing to synchronize");
        return Ok(());
    }

    let (actor, peers) = topology.split_acting(acting)?;
    tracing::info!(%acting, stimulus = %stimulus.describe(), peers = peers.len(), "sync stimulus");
    stimulus.apply(actor).await?;

    let outcomes = join_all(peers.into_iter().map(|peer| observe(peer, check))).await;
    let failures: Vec<PeerFailure> = outcomes.into_iter().filter_map(|o| o.err()).collect();

    if failures.is_empty() {
        journal.note(
            NoteKind::Sync,
            Some(acting),
            format!("{} propagated to all peers", check.description),
        );
        Ok(())
    } else {
        for failure in &failures {
            tracing::warn!(peer = %failure.handle, pattern = %failure.pattern, "peer missed sync");
        }
        Err(HarnessError::SyncVerificationFailed { failures })
    }
}

/// Require `check` on every handle, the acting one included
///
/// # Errors
/// `HarnessError::SyncVerificationFailed` listing every handle that missed.
pub async fn verify_all(topology: &mut Topology, check: &SyncCheck) -> Result<()> {
    let outcomes = join_all(topology.handles_mut().map(|h| observe(h, check))).await;
    let failures: Vec<PeerFailure> = outcomes.into_iter().filter_map(|o| o.err()).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::SyncVerificationFailed { failures })
    }
}

async fn observe(peer: &mut ConnectionHandle, check: &SyncCheck) -> std::result::Result<(), PeerFailure> {
    for pattern in &check.patterns {
        let expectation = Expectation::with_regex(
            format!("{} on {}", check.description, peer.id().server),
            pattern.clone(),
        )
        .timeout(check.timeout);

        if let Err(error) = await_match(peer, &expectation).await {
            return Err(PeerFailure {
                handle: peer.id().clone(),
                pattern: pattern.as_str().to_string(),
                error: Box::new(error),
            });
        }
    }
    peer.journal().note(
        NoteKind::Sync,
        Some(peer.id()),
        format!("observed {}", check.description),
    );
    Ok(())
}
