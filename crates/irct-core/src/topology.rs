//! Topology manager
//!
//! Builds a network of linked servers and their client handles:
//! 1. Validate the whole specification up front (labels, nicks, link order)
//! 2. Bring servers up in the given order (hubs before spokes)
//! 3. For each link, elevate privileges, `CONNECT`, and block on the
//!    link-synced confirmation
//!
//! A link only becomes `Synced` after the confirmation line is matched.
//! Link failures are reported, never retried.

use crate::driver::{register, send_command};
use crate::error::{HarnessError, Result};
use crate::handle::ConnectionHandle;
use crate::journal::{EventJournal, NoteKind};
use crate::matcher::{await_match, Expectation};
use crate::transport::{ConnectRequest, Connector};
use crate::types::{HandleId, ServerLabel};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default bound for a link-synced confirmation
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound for registration (`001`)
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default welcome pattern
pub const WELCOME_PATTERN: &str = r"^:\S+ 001 ";

/// One server in a topology specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Server name
    pub label: ServerLabel,
    /// `host:port` clients dial
    pub address: String,
    /// Nicks of the clients to create, in order
    pub clients: Vec<String>,
    /// Already-built server this one links to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<ServerLabel>,
    /// Pattern the `VERSION` reply must contain before linking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,
}

impl ServerSpec {
    /// Create a spec with no clients and no link
    #[must_use]
    pub fn new(label: ServerLabel, address: impl Into<String>) -> Self {
        Self {
            label,
            address: address.into(),
            clients: Vec::new(),
            link_to: None,
            probe: None,
        }
    }

    /// Add a client
    #[inline]
    #[must_use]
    pub fn client(mut self, nick: impl Into<String>) -> Self {
        self.clients.push(nick.into());
        self
    }

    /// Link to an earlier server
    #[inline]
    #[must_use]
    pub fn link_to(mut self, target: ServerLabel) -> Self {
        self.link_to = Some(target);
        self
    }

    /// Require a `VERSION` reply matching `pattern`
    #[inline]
    #[must_use]
    pub fn probe(mut self, pattern: impl Into<String>) -> Self {
        self.probe = Some(pattern.into());
        self
    }
}

/// Operator credentials used before `CONNECT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperCredentials {
    /// Operator block name
    pub name: String,
    /// Operator password
    pub password: String,
}

impl OperCredentials {
    /// Create credentials
    #[must_use]
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

/// Bring-up tuning
#[derive(Debug, Clone)]
pub struct TopologyOptions {
    /// Bound for the welcome numeric after `NICK`/`USER`
    pub registration_timeout: Duration,
    /// Bound for `VERSION` probes
    pub probe_timeout: Duration,
    /// Bound for the link-synced confirmation
    pub link_timeout: Duration,
    /// Privilege elevation before `CONNECT`
    pub oper: Option<OperCredentials>,
    /// Pattern that marks registration complete
    pub welcome_pattern: String,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            probe_timeout: crate::matcher::DEFAULT_EXPECT_TIMEOUT,
            link_timeout: DEFAULT_LINK_TIMEOUT,
            oper: Some(OperCredentials::new("netadmin", "test")),
            welcome_pattern: WELCOME_PATTERN.to_string(),
        }
    }
}

/// State of one server-to-server link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// `CONNECT` issued, confirmation not yet seen
    Pending,
    /// Confirmation matched
    Synced,
}

/// Confirmation text a server prints once a link finished bursting
#[must_use]
pub fn link_synced_pattern(source: &ServerLabel, target: &ServerLabel) -> String {
    format!(
        "Link {} -> {} is now synced",
        regex::escape(source.as_str()),
        regex::escape(target.as_str())
    )
}

/// A built network of servers and client handles
///
/// Exclusively owned by the scenario that built it.
#[derive(Debug)]
pub struct Topology {
    servers: IndexMap<ServerLabel, Vec<ConnectionHandle>>,
    links: IndexMap<(ServerLabel, ServerLabel), LinkState>,
    journal: Arc<EventJournal>,
}

impl Topology {
    /// Empty topology writing to `journal`
    #[must_use]
    pub fn new(journal: Arc<EventJournal>) -> Self {
        Self {
            servers: IndexMap::new(),
            links: IndexMap::new(),
            journal,
        }
    }

    /// Shared event journal
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Arc<EventJournal> {
        &self.journal
    }

    /// Server labels in bring-up order
    pub fn servers(&self) -> impl Iterator<Item = &ServerLabel> {
        self.servers.keys()
    }

    /// Whether `label` is part of the topology
    #[must_use]
    pub fn contains_server(&self, label: &ServerLabel) -> bool {
        self.servers.contains_key(label)
    }

    /// Handles on one server
    ///
    /// # Errors
    /// `HarnessError::UnknownServer` for a label outside the topology.
    pub fn server_handles(&self, label: &ServerLabel) -> Result<&[ConnectionHandle]> {
        self.servers
            .get(label)
            .map(Vec::as_slice)
            .ok_or_else(|| HarnessError::UnknownServer(label.clone()))
    }

    /// All handles, in bring-up order
    pub fn handles(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.servers.values().flatten()
    }

    /// All handles, mutable, in bring-up order
    pub fn handles_mut(&mut self) -> impl Iterator<Item = &mut ConnectionHandle> {
        self.servers.values_mut().flatten()
    }

    /// All handle ids, in bring-up order
    #[must_use]
    pub fn handle_ids(&self) -> Vec<HandleId> {
        self.handles().map(|h| h.id().clone()).collect()
    }

    /// Number of handles
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }

    /// Look up a handle
    ///
    /// # Errors
    /// `HarnessError::UnknownHandle` if no such handle exists.
    pub fn handle(&self, id: &HandleId) -> Result<&ConnectionHandle> {
        self.servers
            .get(&id.server)
            .and_then(|hs| hs.iter().find(|h| h.id() == id))
            .ok_or_else(|| HarnessError::UnknownHandle(id.clone()))
    }

    /// Look up a handle, mutable
    ///
    /// # Errors
    /// `HarnessError::UnknownHandle` if no such handle exists.
    pub fn handle_mut(&mut self, id: &HandleId) -> Result<&mut ConnectionHandle> {
        self.servers
            .get_mut(&id.server)
            .and_then(|hs| hs.iter_mut().find(|h| h.id() == id))
            .ok_or_else(|| HarnessError::UnknownHandle(id.clone()))
    }

    /// The acting handle plus every other handle, both mutable
    ///
    /// # Errors
    /// `HarnessError::UnknownHandle` if `acting` is not in the topology.
    pub fn split_acting(
        &mut self,
        acting: &HandleId,
    ) -> Result<(&mut ConnectionHandle, Vec<&mut ConnectionHandle>)> {
        let mut actor = None;
        let mut peers = Vec::new();
        for handle in self.servers.values_mut().flatten() {
            if handle.id() == acting {
                actor = Some(handle);
            } else {
                peers.push(handle);
            }
        }
        actor
            .map(|a| (a, peers))
            .ok_or_else(|| HarnessError::UnknownHandle(acting.clone()))
    }

    /// First handle on a server (the one that issues link commands)
    ///
    /// # Errors
    /// `HarnessError::UnknownServer` if the server has no handle.
    pub fn lead_mut(&mut self, label: &ServerLabel) -> Result<&mut ConnectionHandle> {
        self.servers
            .get_mut(label)
            .and_then(|hs| hs.first_mut())
            .ok_or_else(|| HarnessError::UnknownServer(label.clone()))
    }

    /// Every link and its state, in the order attempted
    pub fn links(&self) -> impl Iterator<Item = (&ServerLabel, &ServerLabel, LinkState)> {
        self.links.iter().map(|((s, t), state)| (s, t, *state))
    }

    /// State of the link between two servers, in either direction
    #[must_use]
    pub fn link_state(&self, a: &ServerLabel, b: &ServerLabel) -> Option<LinkState> {
        self.links
            .get(&(a.clone(), b.clone()))
            .or_else(|| self.links.get(&(b.clone(), a.clone())))
            .copied()
    }

    /// Whether every attempted link is confirmed
    #[must_use]
    pub fn all_links_synced(&self) -> bool {
        self.links.values().all(|s| *s == LinkState::Synced)
    }

    /// Move every handle's cursor past everything received so far
    pub fn skip_pending_all(&mut self) {
        for handle in self.handles_mut() {
            handle.skip_pending();
        }
    }

    /// Tear down every handle
    pub async fn teardown(&mut self) {
        for handle in self.servers.values_mut().flatten() {
            handle.teardown().await;
        }
        tracing::debug!(handles = self.handle_count(), "topology torn down");
    }

    fn add_server(&mut self, label: ServerLabel) {
        self.servers.entry(label).or_default();
    }

    fn add_handle(&mut self, handle: ConnectionHandle) {
        self.servers
            .entry(handle.id().server.clone())
            .or_default()
            .push(handle);
    }

    fn begin_link(&mut self, source: &ServerLabel, target: &ServerLabel) -> Result<()> {
        if source == target {
            return Err(HarnessError::InvalidTopology(format!(
                "server {source} cannot link to itself"
            )));
        }
        for label in [source, target] {
            if !self.servers.contains_key(label) {
                return Err(HarnessError::UnknownServer(label.clone()));
            }
        }
        if self.link_state(source, target).is_some() {
            return Err(HarnessError::DuplicateLink(source.clone(), target.clone()));
        }
        self.links
            .insert((source.clone(), target.clone()), LinkState::Pending);
        self.journal.note(
            NoteKind::Link,
            None,
            format!("{source} -> {target} pending"),
        );
        Ok(())
    }

    fn confirm_link(&mut self, source: &ServerLabel, target: &ServerLabel) {
        if let Some(state) = self.links.get_mut(&(source.clone(), target.clone())) {
            *state = LinkState::Synced;
        }
        self.journal
            .note(NoteKind::Link, None, format!("{source} -> {target} synced"));
    }

    fn abandon_link(&mut self, source: &ServerLabel, target: &ServerLabel) {
        self.links.shift_remove(&(source.clone(), target.clone()));
    }
}

/// Builds topologies through a connector
pub struct TopologyManager {
    connector: Arc<dyn Connector>,
    options: TopologyOptions,
}

impl std::fmt::Debug for TopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TopologyManager {
    /// Create a manager
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, options: TopologyOptions) -> Self {
        Self { connector, options }
    }

    /// Bring-up options
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TopologyOptions {
        &self.options
    }

    /// Build a topology with a fresh journal
    ///
    /// # Errors
    /// See `build_with_journal`.
    pub async fn build(&self, specs: &[ServerSpec]) -> Result<Topology> {
        self.build_with_journal(specs, Arc::new(EventJournal::new()))
            .await
    }

    /// Build a topology recording into `journal`
    ///
    /// On failure every handle opened so far is torn down before the error
    /// is returned.
    ///
    /// # Errors
    /// See `populate`.
    pub async fn build_with_journal(
        &self,
        specs: &[ServerSpec],
        journal: Arc<EventJournal>,
    ) -> Result<Topology> {
        let mut topology = Topology::new(journal);
        match self.populate(&mut topology, specs).await {
            Ok(()) => Ok(topology),
            Err(e) => {
                topology.teardown().await;
                Err(e)
            }
        }
    }

    /// Bring servers up into a topology the caller already owns
    ///
    /// Every handle is added to `topology` as soon as its connection opens,
    /// so the caller can tear down a partial bring-up if this future is
    /// dropped or fails. Nothing is torn down here.
    ///
    /// # Errors
    /// - `HarnessError::InvalidTopology` if the server list is rejected
    /// - `HarnessError::Transport` if a connection cannot be opened or written
    /// - `HarnessError::ExpectationTimeout` if registration or a probe stalls
    /// - `HarnessError::LinkTimeout` if a link is never confirmed
    pub async fn populate(&self, topology: &mut Topology, specs: &[ServerSpec]) -> Result<()> {
        validate_specs(specs)?;
        match self.bring_up(topology, specs).await {
            Ok(()) => {
                tracing::info!(
                    servers = specs.len(),
                    handles = topology.handle_count(),
                    "topology ready"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "topology bring-up failed");
                Err(e)
            }
        }
    }

    async fn bring_up(&self, topology: &mut Topology, specs: &[ServerSpec]) -> Result<()> {
        for spec in specs {
            tracing::info!(server = %spec.label, clients = spec.clients.len(), "bringing up server");
            topology.add_server(spec.label.clone());

            for nick in &spec.clients {
                let id = HandleId::new(spec.label.clone(), nick.as_str());
                let handle = self.open_client(spec, &id, topology.journal()).await?;
                topology.add_handle(handle);
                self.register_client(topology.handle_mut(&id)?).await?;
            }

            if let Some(probe) = &spec.probe {
                let lead = topology.lead_mut(&spec.label)?;
                send_command(lead, "VERSION").await?;
                let expectation = Expectation::new(format!("{} probe", spec.label), probe)?
                    .timeout(self.options.probe_timeout);
                await_match(lead, &expectation).await?;
            }

            if let Some(target) = &spec.link_to {
                self.link(topology, &spec.label, target).await?;
            }
        }
        Ok(())
    }

    async fn open_client(
        &self,
        spec: &ServerSpec,
        id: &HandleId,
        journal: &Arc<EventJournal>,
    ) -> Result<ConnectionHandle> {
        let request = ConnectRequest {
            server: spec.label.clone(),
            address: spec.address.clone(),
            nick: id.nick.clone(),
        };
        let connection = self
            .connector
            .connect(&request)
            .await
            .map_err(|e| HarnessError::transport(id, e))?;
        Ok(ConnectionHandle::attach(id.clone(), connection, Arc::clone(journal)))
    }

    async fn register_client(&self, handle: &mut ConnectionHandle) -> Result<()> {
        register(handle).await?;
        let welcome = Expectation::new(
            format!("{} registered", handle.nick()),
            &self.options.welcome_pattern,
        )?
        .timeout(self.options.registration_timeout);
        await_match(handle, &welcome).await?;
        tracing::debug!(handle = %handle.id(), "client registered");
        Ok(())
    }

    /// Link `source` to `target` through `source`'s first client
    ///
    /// # Errors
    /// - `HarnessError::DuplicateLink` if the pair is already linked or pending
    /// - `HarnessError::LinkTimeout` if the confirmation never arrives
    pub async fn link(
        &self,
        topology: &mut Topology,
        source: &ServerLabel,
        target: &ServerLabel,
    ) -> Result<()> {
        topology.begin_link(source, target)?;

        match self.issue_link(topology, source, target).await {
            Ok(()) => {
                topology.confirm_link(source, target);
                tracing::info!(%source, %target, "link synced");
                Ok(())
            }
            Err(HarnessError::ExpectationTimeout { .. }) => {
                topology.abandon_link(source, target);
                Err(HarnessError::LinkTimeout {
                    source_server: source.clone(),
                    target: target.clone(),
                    timeout: self.options.link_timeout,
                })
            }
            Err(e) => {
                topology.abandon_link(source, target);
                Err(e)
            }
        }
    }

    async fn issue_link(
        &self,
        topology: &mut Topology,
        source: &ServerLabel,
        target: &ServerLabel,
    ) -> Result<()> {
        let lead = topology.lead_mut(source)?;
        if let Some(oper) = &self.options.oper {
            send_command(lead, &format!("OPER {} {}", oper.name, oper.password)).await?;
        }
        send_command(lead, &format!("CONNECT {target}")).await?;

        let confirmation = Expectation::new(
            format!("{source}<->{target} linked"),
            &link_synced_pattern(source, target),
        )?
        .timeout(self.options.link_timeout);
        await_match(lead, &confirmation).await?;
        Ok(())
    }
}

/// Reject malformed specifications before any connection is opened
///
/// # Errors
/// `HarnessError::InvalidTopology` describing the first problem found.
pub fn validate_specs(specs: &[ServerSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(HarnessError::InvalidTopology("no servers".to_string()));
    }

    let mut seen: HashSet<&ServerLabel> = HashSet::new();
    for spec in specs {
        if !seen.insert(&spec.label) {
            return Err(HarnessError::InvalidTopology(format!(
                "server {} listed twice",
                spec.label
            )));
        }
        if spec.address.trim().is_empty() {
            return Err(HarnessError::InvalidTopology(format!(
                "server {} has no address",
                spec.label
            )));
        }
        if spec.clients.is_empty() {
            return Err(HarnessError::InvalidTopology(format!(
                "server {} has no clients",
                spec.label
            )));
        }

        let mut nicks = HashSet::new();
        for nick in &spec.clients {
            if nick.is_empty() || nick.contains(char::is_whitespace) || nick.starts_with(':') {
                return Err(HarnessError::InvalidTopology(format!(
                    "invalid nick {nick:?} on {}",
                    spec.label
                )));
            }
            if !nicks.insert(nick.as_str()) {
                return Err(HarnessError::InvalidTopology(format!(
                    "nick {nick} listed twice on {}",
                    spec.label
                )));
            }
        }

        if let Some(target) = &spec.link_to {
            if target == &spec.label {
                return Err(HarnessError::InvalidTopology(format!(
                    "server {} cannot link to itself",
                    spec.label
                )));
            }
            // `seen` holds this spec and everything before it
            if !seen.contains(target) {
                return Err(HarnessError::InvalidTopology(format!(
                    "server {} links to {target}, which is not built before it",
                    spec.label
                )));
            }
        }

        if let Some(probe) = &spec.probe {
            regex::Regex::new(probe)?;
        }
    }
    Ok(())
}
