//! Testing utilities for the IRCT workspace
//!
//! `FakeNetwork` is an in-memory IRC network implementing `Connector`. It
//! speaks just enough of the protocol for the harness: registration,
//! `VERSION`, `OPER`/`CONNECT` linking, capability negotiation, `JOIN`, and
//! the world-module commands with cross-server broadcasts. Per-server
//! `ServerBehavior` knobs inject the failures scenarios must detect.

#![allow(missing_docs)]

use async_trait::async_trait;
use irct_core::{
    ConnectRequest, Connection, Connector, HarnessConfig, LineReader, LineWriter, ServerLabel,
    ServerSpec, TransportError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capability served by the world module
pub const WORLD_CAPABILITY: &str = "world/features";

/// ISUPPORT token advertised when the reputation module is loaded
pub const ISUPPORT_TOKEN: &str = "FAKEREPUTATION";

/// Per-server behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBehavior {
    /// World module loaded: ACK the capability and accept `WORLD`/`MOVE`
    pub world_module: bool,
    /// Advertise `FAKEREPUTATION` in `005`
    pub advertise_isupport: bool,
    /// Deliver the `@world/direction=` line of move broadcasts
    pub emit_direction_tag: bool,
    /// Confirm `CONNECT` with the link-synced notice
    pub link_syncs: bool,
    /// Deliver broadcasts originating on other servers
    pub relays_broadcasts: bool,
    /// Fail every send after registration
    pub fail_sends: bool,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            world_module: true,
            advertise_isupport: true,
            emit_direction_tag: true,
            link_syncs: true,
            relays_broadcasts: true,
            fail_sends: false,
        }
    }
}

impl ServerBehavior {
    /// Server without the world module (capability NAK)
    #[must_use]
    pub fn without_world_module() -> Self {
        Self {
            world_module: false,
            ..Self::default()
        }
    }

    /// Server that drops the direction tag from move broadcasts
    #[must_use]
    pub fn without_direction_tag() -> Self {
        Self {
            emit_direction_tag: false,
            ..Self::default()
        }
    }

    /// Server that never confirms links it initiates
    #[must_use]
    pub fn silent_link() -> Self {
        Self {
            link_syncs: false,
            ..Self::default()
        }
    }

    /// Server that never relays remote broadcasts to its clients
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            relays_broadcasts: false,
            ..Self::default()
        }
    }

    /// Server whose clients cannot send once registered
    #[must_use]
    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Client {
    server: String,
    nick: String,
    tx: Option<mpsc::UnboundedSender<String>>,
    registered: bool,
    oper: bool,
    channels: HashSet<String>,
    in_world: bool,
    position: (i64, i64),
    received: Vec<String>,
}

#[derive(Debug, Default)]
struct NetState {
    servers: HashMap<String, ServerBehavior>,
    clients: Vec<Client>,
    links: Vec<(String, String)>,
}

impl NetState {
    fn send(&self, client: usize, line: String) {
        if let Some(tx) = &self.clients[client].tx {
            let _ = tx.send(line);
        }
    }

    fn behavior(&self, client: usize) -> ServerBehavior {
        self.servers
            .get(&self.clients[client].server)
            .cloned()
            .unwrap_or_default()
    }

    /// Servers reachable from `server` over links, itself included
    fn component(&self, server: &str) -> HashSet<String> {
        let mut seen = HashSet::from([server.to_string()]);
        let mut queue = VecDeque::from([server.to_string()]);
        while let Some(current) = queue.pop_front() {
            for (a, b) in &self.links {
                let next = if *a == current {
                    b
                } else if *b == current {
                    a
                } else {
                    continue;
                };
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        seen
    }

    /// Connected, registered clients that can see a broadcast from `origin`
    fn audience(&self, origin: usize) -> Vec<usize> {
        let server = &self.clients[origin].server;
        let reachable = self.component(server);
        (0..self.clients.len())
            .filter(|&i| i != origin)
            .filter(|&i| {
                let c = &self.clients[i];
                c.tx.is_some() && c.registered && reachable.contains(&c.server)
            })
            .filter(|&i| {
                self.clients[i].server == *server
                    || self
                        .servers
                        .get(&self.clients[i].server)
                        .map_or(true, |b| b.relays_broadcasts)
            })
            .collect()
    }

    fn handle_line(&mut self, id: usize, line: &str) -> Result<(), TransportError> {
        self.clients[id].received.push(line.to_string());
        let behavior = self.behavior(id);
        if behavior.fail_sends && self.clients[id].registered {
            return Err(TransportError::Rejected("send refused by server".to_string()));
        }

        let server = self.clients[id].server.clone();
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_uppercase();
        let args: Vec<&str> = words.collect();
        let nick = self.clients[id].nick.clone();

        match command.as_str() {
            "NICK" => {
                if let Some(new) = args.first() {
                    self.clients[id].nick = (*new).to_string();
                }
            }
            "USER" => {
                self.clients[id].registered = true;
                self.send(id, format!(":{server} 001 {nick} :Welcome to the test network {nick}"));
            }
            "PING" => {
                let token = args.first().copied().unwrap_or(":");
                self.send(id, format!(":{server} PONG {server} {token}"));
            }
            "PONG" => {}
            "VERSION" => {
                self.send(id, format!(":{server} 351 {nick} fake-ircd-1.0 {server} :test build"));
                let reputation = if behavior.advertise_isupport {
                    format!(" {ISUPPORT_TOKEN}")
                } else {
                    String::new()
                };
                self.send(
                    id,
                    format!(":{server} 005 {nick} NETWORK=TestNet CHANTYPES=#{reputation} :are supported by this server"),
                );
            }
            "OPER" => {
                if args == ["netadmin", "test"] {
                    self.clients[id].oper = true;
                    self.send(id, format!(":{server} 381 {nick} :You are now an IRC Operator"));
                } else {
                    self.send(id, format!(":{server} 491 {nick} :No O-lines for your host"));
                }
            }
            "CONNECT" => self.connect(id, &server, &nick, args.first().copied(), &behavior),
            "CAP" => {
                let requested = line.split_once(':').map_or("", |(_, cap)| cap.trim());
                let verdict = if requested == WORLD_CAPABILITY && behavior.world_module {
                    "ACK"
                } else {
                    "NAK"
                };
                self.send(id, format!(":{server} CAP {nick} {verdict} :{requested}"));
            }
            "JOIN" => {
                if let Some(channel) = args.first() {
                    self.clients[id].channels.insert((*channel).to_string());
                    let echo = format!(":{nick}!{nick}@{server} JOIN {channel}");
                    for peer in self.audience(id) {
                        if self.clients[peer].channels.contains(*channel) {
                            self.send(peer, echo.clone());
                        }
                    }
                    self.send(id, echo);
                }
            }
            "WORLD" if behavior.world_module => self.world(id, &server, &nick, &args),
            "MOVE" if behavior.world_module => self.movement(id, &server, &nick, args.first().copied()),
            "QUIT" => {
                self.clients[id].tx = None;
            }
            _ => {
                self.send(id, format!(":{server} 421 {nick} {command} :Unknown command"));
            }
        }
        Ok(())
    }

    fn connect(
        &mut self,
        id: usize,
        server: &str,
        nick: &str,
        target: Option<&str>,
        behavior: &ServerBehavior,
    ) {
        if !self.clients[id].oper {
            self.send(id, format!(":{server} 481 {nick} :Permission Denied"));
            return;
        }
        let Some(target) = target else {
            self.send(id, format!(":{server} 461 {nick} CONNECT :Not enough parameters"));
            return;
        };
        if !self.servers.contains_key(target) {
            self.send(id, format!(":{server} 402 {nick} {target} :No such server"));
            return;
        }
        if !behavior.link_syncs {
            tracing::debug!(%server, %target, "fake link stays silent");
            return;
        }
        self.links.push((server.to_string(), target.to_string()));
        self.send(
            id,
            format!(":{server} NOTICE {nick} :*** Link {server} -> {target} is now synced"),
        );
    }

    fn world(&mut self, id: usize, server: &str, nick: &str, args: &[&str]) {
        let prefix = format!(":{nick}!{nick}@{server}");
        match args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("join") => {
                self.clients[id].in_world = true;
                self.send(id, format!(":{server} 2200 {nick} :You have entered the world"));
                self.send(id, format!(":{server} MODE {nick} +y"));
                for peer in self.audience(id) {
                    self.send(peer, format!("{prefix} WORLD JOIN {nick}"));
                    self.send(peer, format!(":{server} MODE {nick} +y"));
                }
            }
            Some("part") => {
                self.clients[id].in_world = false;
                self.send(id, format!(":{server} 2201 {nick} :You have left the world"));
                for peer in self.audience(id) {
                    self.send(peer, format!("{prefix} WORLD PART {nick}"));
                }
            }
            _ => {
                self.send(id, format!(":{server} 461 {nick} WORLD :Unknown subcommand"));
            }
        }
    }

    fn movement(&mut self, id: usize, server: &str, nick: &str, direction: Option<&str>) {
        let delta = match direction.map(str::to_ascii_lowercase).as_deref() {
            Some("north") => (0, 1),
            Some("south") => (0, -1),
            Some("east") => (1, 0),
            Some("west") => (-1, 0),
            _ => {
                self.send(id, format!(":{server} 2219 {nick} :Invalid direction"));
                return;
            }
        };
        let direction = direction.unwrap_or_default().to_ascii_lowercase();
        let (x, y) = {
            let pos = &mut self.clients[id].position;
            pos.0 += delta.0;
            pos.1 += delta.1;
            *pos
        };

        let prefix = format!(":{nick}!{nick}@{server}");
        self.send(
            id,
            format!("@world/location={x},{y};world/direction={direction} :{server} 2210 {nick} {direction} :You moved {direction}"),
        );
        for peer in self.audience(id) {
            let tags_direction = self.behavior(peer).emit_direction_tag;
            self.send(peer, format!("{prefix} WORLD MOVE {direction}"));
            self.send(peer, format!("@world/location={x},{y} {prefix} WORLD LOCATION {x} {y}"));
            if tags_direction {
                self.send(peer, format!("@world/direction={direction} {prefix} WORLD FACING {direction}"));
            }
        }
    }
}

/// In-memory IRC network
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetState>>,
}

impl FakeNetwork {
    /// Empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or reconfigure) a server
    #[must_use]
    pub fn server(self, label: &str, behavior: ServerBehavior) -> Self {
        self.state.lock().servers.insert(label.to_string(), behavior);
        self
    }

    /// Network hosting every server of `config` with default behaviour
    #[must_use]
    pub fn for_config(config: &HarnessConfig) -> Self {
        config
            .servers
            .iter()
            .fold(Self::new(), |net, spec| net.server(spec.label.as_str(), ServerBehavior::default()))
    }

    /// Established links, in creation order
    #[must_use]
    pub fn links(&self) -> Vec<(String, String)> {
        self.state.lock().links.clone()
    }

    /// Lines the server received from `nick` on `server`
    #[must_use]
    pub fn received(&self, server: &str, nick: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .clients
            .iter()
            .filter(|c| c.server == server && c.nick == nick)
            .flat_map(|c| c.received.iter().cloned())
            .collect()
    }

    /// Whether the client is currently in the world
    #[must_use]
    pub fn in_world(&self, server: &str, nick: &str) -> bool {
        let state = self.state.lock();
        state
            .clients
            .iter()
            .any(|c| c.server == server && c.nick == nick && c.tx.is_some() && c.in_world)
    }

    /// Number of client sessions still open
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.lock().clients.iter().filter(|c| c.tx.is_some()).count()
    }

    /// Push a raw line to a connected client
    pub fn inject(&self, server: &str, nick: &str, line: impl Into<String>) {
        let state = self.state.lock();
        let line = line.into();
        for (i, client) in state.clients.iter().enumerate() {
            if client.server == server && client.nick == nick {
                state.send(i, line.clone());
            }
        }
    }

    /// Drop every session on `server`, as if it crashed
    pub fn kill_server(&self, server: &str) {
        let mut state = self.state.lock();
        for client in state.clients.iter_mut().filter(|c| c.server == server) {
            client.tx = None;
        }
        state.links.retain(|(a, b)| a != server && b != server);
    }
}

#[async_trait]
impl Connector for FakeNetwork {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            if !state.servers.contains_key(request.server.as_str()) {
                return Err(TransportError::Connect {
                    address: request.address.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            state.clients.push(Client {
                server: request.server.to_string(),
                nick: request.nick.clone(),
                tx: Some(tx),
                registered: false,
                oper: false,
                channels: HashSet::new(),
                in_world: false,
                position: (0, 0),
                received: Vec::new(),
            });
            state.clients.len() - 1
        };
        Ok(Connection {
            writer: Box::new(FakeWriter {
                state: Arc::clone(&self.state),
                id,
            }),
            reader: Box::new(FakeReader { rx }),
        })
    }
}

struct FakeWriter {
    state: Arc<Mutex<NetState>>,
    id: usize,
}

#[async_trait]
impl LineWriter for FakeWriter {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.clients[self.id].tx.is_none() {
            return Err(TransportError::Closed);
        }
        state.handle_line(self.id, line)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.state.lock().clients[self.id].tx = None;
        Ok(())
    }
}

struct FakeReader {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl LineReader for FakeReader {
    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Parse a label in tests
#[must_use]
pub fn label(s: &str) -> ServerLabel {
    ServerLabel::new(s).expect("valid test label")
}

/// Stock irc1/irc2/irc3 config with fake addresses
#[must_use]
pub fn three_server_config() -> HarnessConfig {
    HarnessConfig::three_server_network("fake", 6900).expect("stock labels are valid")
}

/// Stock network where every server behaves normally
#[must_use]
pub fn three_server_network() -> (FakeNetwork, HarnessConfig) {
    let config = three_server_config();
    (FakeNetwork::for_config(&config), config)
}

/// Single server with one client
#[must_use]
pub fn single_server_specs() -> Vec<ServerSpec> {
    vec![ServerSpec::new(label("irc1.test.net"), "fake:6900").client("c1a")]
}
