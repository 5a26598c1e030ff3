//! Error types for the harness core
//!
//! Every failure beneath the scenario runner is a `HarnessError`. Nothing in
//! the core catches or retries these; the runner converts them into a
//! terminal `ScenarioResult`.

use crate::config::ConfigError;
use crate::transport::TransportError;
use crate::types::{HandleId, LabelError, ServerLabel};
use std::fmt;
use std::time::Duration;

/// Result alias used throughout the core
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Link between two servers never reported as synced
    #[error("link {source_server} -> {target} not synced within {}s", .timeout.as_secs_f64())]
    LinkTimeout {
        /// Server whose client issued `CONNECT`
        source_server: ServerLabel,
        /// Link target
        target: ServerLabel,
        /// Bound that elapsed
        timeout: Duration,
    },

    /// Sending on (or reading from) a handle failed
    #[error("transport error on {handle}: {source}")]
    Transport {
        /// Handle whose connection failed
        handle: HandleId,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// A single wait elapsed without a matching line
    #[error("{handle}: timed out after {:.1}s waiting for {description} (/{pattern}/)", .elapsed.as_secs_f64())]
    ExpectationTimeout {
        /// Handle that was waited on
        handle: HandleId,
        /// Human-readable description of the expectation
        description: String,
        /// Pattern source
        pattern: String,
        /// Time actually waited
        elapsed: Duration,
    },

    /// One or more peers did not observe a propagated change
    #[error("sync verification failed on {}", FailedList(.failures))]
    SyncVerificationFailed {
        /// Every peer that missed, in topology order
        failures: Vec<PeerFailure>,
    },

    /// Topology specification rejected before bring-up
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A link for this server pair already exists or is being attempted
    #[error("duplicate link between {0} and {1}")]
    DuplicateLink(ServerLabel, ServerLabel),

    /// Server label not part of the topology
    #[error("unknown server: {0}")]
    UnknownServer(ServerLabel),

    /// Handle not part of the topology
    #[error("unknown handle: {0}")]
    UnknownHandle(HandleId),

    /// Malformed server label
    #[error("invalid server label: {0}")]
    InvalidLabel(#[from] LabelError),

    /// Pattern failed to compile
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scenario cancelled from outside
    #[error("scenario cancelled: {0}")]
    Cancelled(String),
}

impl HarnessError {
    /// Wrap a transport error with the handle it occurred on
    #[inline]
    pub fn transport(handle: &HandleId, source: TransportError) -> Self {
        Self::Transport {
            handle: handle.clone(),
            source,
        }
    }

    /// Check if the error was raised before any stimulus was sent
    #[inline]
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopology(_)
                | Self::DuplicateLink(..)
                | Self::InvalidLabel(_)
                | Self::InvalidPattern(_)
                | Self::Config(_)
                | Self::LinkTimeout { .. }
        )
    }

    /// Handles implicated by this error
    #[must_use]
    pub fn failed_handles(&self) -> Vec<HandleId> {
        match self {
            Self::Transport { handle, .. } | Self::ExpectationTimeout { handle, .. } => {
                vec![handle.clone()]
            }
            Self::SyncVerificationFailed { failures } => {
                failures.iter().map(|f| f.handle.clone()).collect()
            }
            Self::UnknownHandle(handle) => vec![handle.clone()],
            _ => Vec::new(),
        }
    }
}

/// One peer's miss inside a sync verification
#[derive(Debug)]
pub struct PeerFailure {
    /// Peer that missed
    pub handle: HandleId,
    /// First pattern the peer did not produce
    pub pattern: String,
    /// Why the wait ended
    pub error: Box<HarnessError>,
}

struct FailedList<'a>(&'a [PeerFailure]);

impl fmt::Display for FailedList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} (missing /{}/)", failure.handle, failure.pattern)?;
        }
        Ok(())
    }
}
