//! Core identity types for the harness
//!
//! - `ServerLabel`: validated server name (doubles as the IRC server name)
//! - `HandleId`: one client session on one server
//! - `Cursor`: position in a handle's inbound log
//! - `ScenarioId`: sortable id for one scenario invocation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Maximum length of a server label (RFC 1035 host name limit)
pub const MAX_LABEL_LEN: usize = 253;

/// Name of one server in a topology
///
/// Labels are host names such as `irc1.test.net`. They are used verbatim in
/// `CONNECT` commands and in link-synced confirmations, so only host-name
/// characters are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerLabel(String);

impl ServerLabel {
    /// Parse and validate a label
    ///
    /// # Errors
    /// Returns `LabelError` if the label is empty, too long, or contains a
    /// character outside `[A-Za-z0-9.-]`.
    pub fn new(label: impl Into<String>) -> Result<Self, LabelError> {
        let label = label.into();
        validate_label(&label)?;
        Ok(Self(label))
    }

    /// Label as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServerLabel {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerLabel> for String {
    fn from(value: ServerLabel) -> Self {
        value.0
    }
}

/// Server label validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    /// Empty label
    #[error("server label is empty")]
    Empty,

    /// Label exceeds `MAX_LABEL_LEN`
    #[error("server label too long ({0} bytes)")]
    TooLong(usize),

    /// Character outside the host-name alphabet
    #[error("invalid character {ch:?} in server label {label:?}")]
    InvalidChar {
        /// Label as given
        label: String,
        /// First offending character
        ch: char,
    },

    /// Leading/trailing dot or hyphen, or an empty segment
    #[error("malformed server label {0:?}")]
    Malformed(String),

    /// Handle text not of the form `nick@server`
    #[error("handle {0:?} is not of the form nick@server")]
    MalformedHandle(String),
}

fn validate_label(label: &str) -> Result<(), LabelError> {
    if label.is_empty() {
        return Err(LabelError::Empty);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(LabelError::TooLong(label.len()));
    }
    if let Some(ch) = label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(LabelError::InvalidChar {
            label: label.to_string(),
            ch,
        });
    }
    let malformed = label
        .split('.')
        .any(|seg| seg.is_empty() || seg.starts_with('-') || seg.ends_with('-'));
    if malformed {
        return Err(LabelError::Malformed(label.to_string()));
    }
    Ok(())
}

/// Identity of one client session: nick on a server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId {
    /// Server the client is attached to
    pub server: ServerLabel,
    /// Client nick
    pub nick: String,
}

impl HandleId {
    /// Create a handle id
    #[inline]
    #[must_use]
    pub fn new(server: ServerLabel, nick: impl Into<String>) -> Self {
        Self {
            server,
            nick: nick.into(),
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.nick, self.server)
    }
}

impl FromStr for HandleId {
    type Err = LabelError;

    /// Parse `nick@server`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((nick, server)) if !nick.is_empty() && !nick.contains(char::is_whitespace) => {
                Ok(Self::new(ServerLabel::new(server)?, nick))
            }
            _ => Err(LabelError::MalformedHandle(s.to_string())),
        }
    }
}

/// Position in an inbound log (index of the next line to examine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cursor(pub usize);

impl Cursor {
    /// Cursor at the start of the log
    pub const START: Cursor = Cursor(0);

    /// Index value
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique id of one scenario invocation (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioId(pub Ulid);

impl ScenarioId {
    /// Generate new scenario ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
