//! Harness configuration
//!
//! Loaded from TOML. Every field has a default matching the stock
//! three-server world test network, so an empty file is a valid config
//! apart from the server list.

use crate::topology::{validate_specs, OperCredentials, ServerSpec, TopologyOptions, WELCOME_PATTERN};
use crate::types::{HandleId, ServerLabel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Wait bounds, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Single expectation (sync checks, acks)
    pub expect_secs: u64,
    /// Link-synced confirmation
    pub link_secs: u64,
    /// Registration welcome
    pub registration_secs: u64,
    /// `VERSION` probe
    pub probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            expect_secs: 5,
            link_secs: 15,
            registration_secs: 10,
            probe_secs: 5,
        }
    }
}

/// Top-level harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Wait bounds
    pub timeouts: Timeouts,
    /// Operator credentials used before `CONNECT`
    pub oper: Option<OperCredentials>,
    /// Capability requested before world scenarios
    pub capability: String,
    /// Channel joined by every client
    pub world_channel: String,
    /// ISUPPORT token every server must advertise before linking
    pub isupport_probe: Option<String>,
    /// Handle that issues stimuli in scenarios
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting: Option<HandleId>,
    /// Servers in bring-up order
    pub servers: Vec<ServerSpec>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            oper: Some(OperCredentials::new("netadmin", "test")),
            capability: "world/features".to_string(),
            world_channel: "#world".to_string(),
            isupport_probe: Some("FAKEREPUTATION".to_string()),
            acting: None,
            servers: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock three-server network on consecutive local ports
    ///
    /// `irc1` and `irc3` link to `irc2`; `irc2` is brought up first so both
    /// spokes have a hub to connect to. `c1a` on `irc1` is the acting handle.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if `base_port + 2` does not fit in a port.
    pub fn three_server_network(host: &str, base_port: u16) -> Result<Self, ConfigError> {
        let label = |s: &str| {
            ServerLabel::new(s).map_err(|e| ConfigError::Invalid(e.to_string()))
        };
        let irc1 = label("irc1.test.net")?;
        let irc2 = label("irc2.test.net")?;
        let irc3 = label("irc3.test.net")?;

        let port = |offset: u16| {
            base_port.checked_add(offset).ok_or_else(|| {
                ConfigError::Invalid(format!("base port {base_port} leaves no room for three servers"))
            })
        };
        let (irc2_port, irc3_port) = (port(1)?, port(2)?);

        let acting = HandleId::new(irc1.clone(), "c1a");
        let servers = vec![
            ServerSpec::new(irc2.clone(), format!("{host}:{irc2_port}")).client("c2a"),
            ServerSpec::new(irc1, format!("{host}:{base_port}"))
                .client("c1a")
                .link_to(irc2.clone()),
            ServerSpec::new(irc3, format!("{host}:{irc3_port}"))
                .client("c3a")
                .link_to(irc2),
        ];
        Ok(Self::default().with_servers(servers).with_acting(acting))
    }

    /// With server list
    #[inline]
    #[must_use]
    pub fn with_servers(mut self, servers: Vec<ServerSpec>) -> Self {
        self.servers = servers;
        self
    }

    /// With acting handle
    #[inline]
    #[must_use]
    pub fn with_acting(mut self, acting: HandleId) -> Self {
        self.acting = Some(acting);
        self
    }

    /// With wait bounds
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With capability name
    #[inline]
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    /// With ISUPPORT probe token (`None` disables the probe)
    #[inline]
    #[must_use]
    pub fn with_isupport_probe(mut self, token: Option<String>) -> Self {
        self.isupport_probe = token;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, `ConfigError::Invalid` if
    /// validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// `from_toml_str`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ConfigError::Serialize` if TOML serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        if t.expect_secs == 0 || t.link_secs == 0 || t.registration_secs == 0 || t.probe_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.capability.trim().is_empty() || self.capability.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "capability {:?} must be a single token",
                self.capability
            )));
        }
        if !self.world_channel.starts_with(['#', '&']) || self.world_channel.contains(' ') {
            return Err(ConfigError::Invalid(format!(
                "world channel {:?} is not a channel name",
                self.world_channel
            )));
        }
        if let Some(token) = &self.isupport_probe {
            if token.trim().is_empty() {
                return Err(ConfigError::Invalid("empty isupport probe".to_string()));
            }
        }
        if !self.servers.is_empty() {
            validate_specs(&self.server_specs()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(acting) = &self.acting {
            let known = self
                .servers
                .iter()
                .any(|s| s.label == acting.server && s.clients.contains(&acting.nick));
            if !known {
                return Err(ConfigError::Invalid(format!(
                    "acting handle {acting} is not a configured client"
                )));
            }
        }
        Ok(())
    }

    /// Server specs with the global ISUPPORT probe applied
    #[must_use]
    pub fn server_specs(&self) -> Vec<ServerSpec> {
        self.servers
            .iter()
            .cloned()
            .map(|mut spec| {
                if spec.probe.is_none() {
                    spec.probe = self.isupport_probe.as_deref().map(isupport_pattern);
                }
                spec
            })
            .collect()
    }

    /// Bound for a single expectation
    #[inline]
    #[must_use]
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.expect_secs)
    }

    /// Bring-up options derived from this config
    #[must_use]
    pub fn topology_options(&self) -> TopologyOptions {
        TopologyOptions {
            registration_timeout: Duration::from_secs(self.timeouts.registration_secs),
            probe_timeout: Duration::from_secs(self.timeouts.probe_secs),
            link_timeout: Duration::from_secs(self.timeouts.link_secs),
            oper: self.oper.clone(),
            welcome_pattern: WELCOME_PATTERN.to_string(),
        }
    }
}

/// `VERSION` reply pattern requiring an ISUPPORT token
#[must_use]
pub fn isupport_pattern(token: &str) -> String {
    format!(r":.+ 005 .*{}", regex::escape(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_matches_stock_network() {
        let config = HarnessConfig::default();
        assert_eq!(config.timeouts.expect_secs, 5);
        assert_eq!(config.timeouts.link_secs, 15);
        assert_eq!(config.capability, "world/features");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn three_server_network_orders_hub_first() {
        let config = HarnessConfig::three_server_network("127.0.0.1", 6900).unwrap();
        let labels: Vec<_> = config.servers.iter().map(|s| s.label.to_string()).collect();
        assert_eq!(labels, vec!["irc2.test.net", "irc1.test.net", "irc3.test.net"]);
        assert_eq!(config.servers[1].address, "127.0.0.1:6900");
        assert_eq!(config.acting.as_ref().unwrap().to_string(), "c1a@irc1.test.net");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_round_trip() {
        let config = HarnessConfig::three_server_network("localhost", 7000).unwrap();
        let text = config.to_toml_string().unwrap();
        let parsed = HarnessConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn stock_network_rejects_port_overflow() {
        let err = HarnessConfig::three_server_network("127.0.0.1", 65_535).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(HarnessConfig::three_server_network("127.0.0.1", 65_534).is_err());

        let config = HarnessConfig::three_server_network("127.0.0.1", 65_533).unwrap();
        let addresses: Vec<_> = config.servers.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(addresses, ["127.0.0.1:65534", "127.0.0.1:65533", "127.0.0.1:65535"]);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let text = r##"
            world_channel = "#lobby"

            [timeouts]
            link_secs = 30

            [[servers]]
            label = "irc1.test.net"
            address = "127.0.0.1:6667"
            clients = ["alice", "bob"]
        "##;
        let config = HarnessConfig::from_toml_str(text).unwrap();
        assert_eq!(config.timeouts.link_secs, 30);
        assert_eq!(config.timeouts.expect_secs, 5);
        assert_eq!(config.world_channel, "#lobby");
        assert_eq!(config.servers[0].clients, vec!["alice", "bob"]);
    }

    #[test]
    fn invalid_label_rejected_at_parse() {
        let text = r#"
            [[servers]]
            label = "irc 1"
            address = "127.0.0.1:6667"
            clients = ["alice"]
        "#;
        assert!(matches!(
            HarnessConfig::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = HarnessConfig::default().with_timeouts(Timeouts {
            expect_secs: 0,
            ..Timeouts::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn forward_link_rejected() {
        let text = r#"
            [[servers]]
            label = "irc1.test.net"
            address = "127.0.0.1:6667"
            clients = ["c1a"]
            link_to = "irc2.test.net"

            [[servers]]
            label = "irc2.test.net"
            address = "127.0.0.1:6668"
            clients = ["c2a"]
        "#;
        assert!(matches!(
            HarnessConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_acting_handle_rejected() {
        let config = HarnessConfig::three_server_network("127.0.0.1", 6900)
            .unwrap()
            .with_acting("c9a@irc1.test.net".parse().unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn global_probe_applied_to_specs() {
        let config = HarnessConfig::three_server_network("127.0.0.1", 6900).unwrap();
        let specs = config.server_specs();
        assert!(specs.iter().all(|s| s.probe.as_deref() == Some(":.+ 005 .*FAKEREPUTATION")));

        let config = config.with_isupport_probe(None);
        assert!(config.server_specs().iter().all(|s| s.probe.is_none()));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = HarnessConfig::load("/nonexistent/irct.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("irct.toml");
        let config = HarnessConfig::three_server_network("127.0.0.1", 6900).unwrap();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }
}
