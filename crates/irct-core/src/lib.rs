//! IRCT Core - multi-server IRC test orchestration
//!
//! Brings up a network of linked IRC servers with client sessions on each,
//! drives commands through one session and verifies that every other
//! session observes the propagated effect:
//! - Topology manager: ordered bring-up, operator `CONNECT`, link confirmation
//! - Command driver and expectation matcher over per-handle inbound logs
//! - Sync verifier: act once, await all peers, aggregate every miss
//! - Scenario runner: one verdict per scenario, teardown on every path
//!
//! # Example
//!
//! ```rust,ignore
//! use irct_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> irct_core::Result<()> {
//! let config = HarnessConfig::three_server_network("127.0.0.1", 6900)?;
//! let manager = TopologyManager::new(Arc::new(TcpConnector::default()), config.topology_options());
//! let mut topology = manager.build(&config.server_specs()).await?;
//!
//! let acting = topology.handle_ids()[0].clone();
//! let check = SyncCheck::new("world join", &[r"WORLD.*JOIN"])?;
//! verify_sync(&mut topology, &acting, &Command::new("WORLD join"), &check).await?;
//! topology.teardown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod journal;
pub mod matcher;
pub mod runner;
pub mod sync;
pub mod topology;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use config::{ConfigError, HarnessConfig, Timeouts};
pub use driver::{register, send_all, send_command};
pub use error::{HarnessError, PeerFailure, Result};
pub use handle::{ConnectionHandle, InboundLine, InboundLog, OutboundRecord};
pub use journal::{Direction, EventJournal, JournalEvent, NoteKind};
pub use matcher::{await_any, await_match, Expectation, MatchedLine, DEFAULT_EXPECT_TIMEOUT};
pub use runner::{
    Scenario, ScenarioOutcome, ScenarioResult, ScenarioRunner, ScenarioState, ScenarioStatus,
    SuiteOptions, SuiteReport,
};
pub use sync::{verify_all, verify_sync, AckedCommand, Command, Stimulus, SyncCheck};
pub use topology::{
    LinkState, OperCredentials, ServerSpec, Topology, TopologyManager, TopologyOptions,
};
pub use transport::{
    ConnectRequest, Connection, Connector, LineReader, LineWriter, TcpConnector, TransportError,
};
pub use types::{Cursor, HandleId, LabelError, ScenarioId, ServerLabel};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for writing scenarios
    pub use crate::{
        await_match, send_command, verify_all, verify_sync, AckedCommand, Command,
        ConnectionHandle, Expectation, HandleId, HarnessConfig, HarnessError, Scenario,
        ScenarioOutcome, ScenarioRunner, ServerLabel, ServerSpec, SyncCheck, TcpConnector,
        Topology, TopologyManager,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
